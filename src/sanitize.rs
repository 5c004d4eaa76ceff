//! Boundary between untyped planner output and typed [`Action`]s.
//!
//! Nothing past this module sees raw JSON. Records that cannot become a
//! directly resolvable action are logged and dropped; the rest of the batch
//! survives.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{Action, ActionKind, SelectorKind};
use crate::error::SelectorError;

static CONTAINS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?P<base>.*?):contains\(\s*(?:'(?P<sq>[^']*)'|"(?P<dq>[^"]*)")\s*\)$"#)
        .expect("valid regex")
});
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z][a-zA-Z0-9-]*|\*)").expect("valid regex"));
static ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([A-Za-z0-9_-]+)").expect("valid regex"));
static CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([A-Za-z0-9_-]+)").expect("valid regex"));
static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[\s*([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:'([^']*)'|"([^"]*)"|([^\]\s'"]+))\s*\]"#)
        .expect("valid regex")
});

/// A planner record as it arrives: every field optional, several spellings accepted.
#[derive(Debug, Default, Deserialize)]
struct RawAction {
    #[serde(alias = "kind")]
    action: Option<String>,
    #[serde(alias = "selector_type", alias = "selectorKind", alias = "selectorType")]
    selector_kind: Option<String>,
    selector: Option<String>,
    #[serde(alias = "description", alias = "label")]
    field: Option<String>,
    value: Option<Value>,
}

/// Validate a batch of raw planner records into executable actions, in order.
pub fn sanitize(raw_actions: &[Value]) -> Vec<Action> {
    raw_actions
        .iter()
        .enumerate()
        .filter_map(|(idx, raw)| match sanitize_one(raw) {
            Ok(action) => Some(action),
            Err(reason) => {
                warn!(index = idx, %reason, "dropping planner action");
                None
            }
        })
        .collect()
}

fn sanitize_one(raw: &Value) -> Result<Action, String> {
    let record: RawAction =
        serde_json::from_value(raw.clone()).map_err(|e| format!("not an action record: {e}"))?;

    let kind_name = record
        .action
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or("missing action kind")?;
    let kind = parse_kind(kind_name);
    if kind == ActionKind::Unknown {
        warn!(kind = kind_name, "planner produced an unsupported action kind; keeping it for the executor to skip");
    }

    let selector = record
        .selector
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("missing selector")?;

    let value = record.value.as_ref().and_then(value_to_string);
    if kind.needs_value() && value.is_none() {
        return Err(format!("{} action on '{}' has no value", kind.as_str(), selector));
    }

    let (selector_kind, selector) = if selector.contains(":contains(") {
        let translated = contains_to_xpath(selector).map_err(|e| e.to_string())?;
        debug!(from = selector, to = %translated, "translated :contains selector");
        (SelectorKind::XPath, translated)
    } else {
        (declared_kind(record.selector_kind.as_deref(), selector), selector.to_string())
    };

    Ok(Action {
        kind,
        selector_kind,
        selector,
        field: record.field.map(|f| f.trim().to_string()).unwrap_or_default(),
        value,
    })
}

fn parse_kind(name: &str) -> ActionKind {
    match name.to_ascii_lowercase().as_str() {
        "fill" | "input_text" | "input" | "type" | "type_text" | "fill_text" | "enter_text" => {
            ActionKind::Fill
        }
        "click" | "check" => ActionKind::Click,
        "upload" | "upload_file" | "file_upload" | "attach" => ActionKind::Upload,
        _ => ActionKind::Unknown,
    }
}

fn declared_kind(declared: Option<&str>, selector: &str) -> SelectorKind {
    match declared.map(|d| d.trim().to_ascii_lowercase()) {
        Some(d) if d == "xpath" || d == "structural" => SelectorKind::XPath,
        Some(d) if d == "css" => SelectorKind::Css,
        _ if selector.starts_with('/') || selector.starts_with("(/") => SelectorKind::XPath,
        _ => SelectorKind::Css,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Translate `base:contains('text')` into an XPath over the base's tag name,
/// id, class tokens and attribute equalities plus a text-containment predicate.
pub fn contains_to_xpath(selector: &str) -> Result<String, SelectorError> {
    let malformed = || SelectorError::Malformed(selector.to_string());
    let caps = CONTAINS.captures(selector.trim()).ok_or_else(malformed)?;
    let text = caps
        .name("sq")
        .or_else(|| caps.name("dq"))
        .map(|m| m.as_str().trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(malformed)?;
    let base = caps.name("base").map(|m| m.as_str().trim()).unwrap_or("");

    // Combinators and pseudo-classes have no structural equivalent here.
    if ATTR.replace_all(base, "").contains([' ', '>', '+', '~', ',', ':']) {
        return Err(malformed());
    }

    let (tag, rest) = match TAG.find(base) {
        Some(m) => (m.as_str(), &base[m.end()..]),
        None => ("*", base),
    };

    let mut conditions = Vec::new();
    // Attribute values may contain '#' or '.', so pull them out first.
    let without_attrs = ATTR.replace_all(rest, "");
    if let Some(id) = ID.captures(&without_attrs) {
        conditions.push(format!("@id={}", xpath_literal(&id[1])));
    }
    for class in CLASS.captures_iter(&without_attrs) {
        conditions.push(format!(
            "contains(concat(' ', normalize-space(@class), ' '), {})",
            xpath_literal(&format!(" {} ", &class[1]))
        ));
    }
    for attr in ATTR.captures_iter(rest) {
        let value = attr
            .get(2)
            .or_else(|| attr.get(3))
            .or_else(|| attr.get(4))
            .map(|m| m.as_str())
            .unwrap_or("");
        conditions.push(format!("@{}={}", &attr[1], xpath_literal(value)));
    }
    conditions.push(format!("contains(., {})", xpath_literal(text)));

    Ok(format!("//{}[{}]", tag, conditions.join(" and ")))
}

/// Quote a string as an XPath 1.0 literal.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contains_selector_becomes_structural_query() {
        let actions = sanitize(&[json!({
            "action": "click",
            "selector": "button:contains('Next')",
            "field": "Next button"
        })]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].selector_kind, SelectorKind::XPath);
        assert_eq!(actions[0].selector, "//button[contains(., 'Next')]");
        assert_eq!(actions[0].field, "Next button");
    }

    #[test]
    fn contains_translation_keeps_id_classes_and_attributes() {
        let xpath =
            contains_to_xpath(r#"a#apply.btn.btn-primary[data-role="cta"]:contains("Apply now")"#)
                .unwrap();
        assert_eq!(
            xpath,
            "//a[@id='apply' and contains(concat(' ', normalize-space(@class), ' '), ' btn ') \
             and contains(concat(' ', normalize-space(@class), ' '), ' btn-primary ') \
             and @data-role='cta' and contains(., 'Apply now')]"
        );

        assert_eq!(
            contains_to_xpath(":contains('Submit')").unwrap(),
            "//*[contains(., 'Submit')]"
        );
        assert_eq!(
            contains_to_xpath("label:contains(\"Don't include\")").unwrap(),
            "//label[contains(., \"Don't include\")]"
        );
    }

    #[test]
    fn unparseable_contains_is_dropped_not_fatal() {
        let actions = sanitize(&[
            json!({"action": "click", "selector": "button:contains()", "field": "broken"}),
            json!({"action": "click", "selector": "div > button:contains('Go')", "field": "combinator"}),
            json!({"action": "click", "selector": "#next", "field": "Next"}),
        ]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].selector, "#next");
        assert_eq!(actions[0].selector_kind, SelectorKind::Css);
    }

    #[test]
    fn fill_and_upload_require_a_value() {
        let actions = sanitize(&[
            json!({"action": "upload", "selector": "#resume", "field": "Resume"}),
            json!({"action": "fill", "selector": "#email", "value": null}),
            json!({"action": "input_text", "selector": "#age", "value": 42}),
        ]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Fill);
        assert_eq!(actions[0].value.as_deref(), Some("42"));
    }

    #[test]
    fn missing_selector_or_kind_is_dropped() {
        let actions = sanitize(&[
            json!({"action": "click", "selector": "   "}),
            json!({"selector": "#x"}),
            json!("click #next"),
        ]);
        assert!(actions.is_empty());
    }

    #[test]
    fn selector_kind_is_declared_or_inferred() {
        let actions = sanitize(&[
            json!({"action": "click", "selector": "//button[@type='submit']"}),
            json!({"action": "click", "selector": "id('next')", "selector_type": "xpath"}),
            json!({"kind": "click", "selector": "button.primary"}),
        ]);
        let kinds: Vec<SelectorKind> = actions.iter().map(|a| a.selector_kind).collect();
        assert_eq!(
            kinds,
            vec![SelectorKind::XPath, SelectorKind::XPath, SelectorKind::Css]
        );
    }

    #[test]
    fn unknown_kinds_survive_for_the_executor() {
        let actions = sanitize(&[
            json!({"action": "hover", "selector": "#menu"}),
            json!({"action": "select_option", "selector": "select[name=state]", "field": "State", "value": "NSW"}),
            json!({"action": "select", "selector": "select[name=state]", "value": "NSW"}),
            json!({"action": "press", "selector": "#search", "value": "Enter"}),
        ]);
        assert_eq!(actions.len(), 4);
        assert!(actions.iter().all(|a| a.kind == ActionKind::Unknown));
        assert_eq!(actions[1].value.as_deref(), Some("NSW"));
    }

    #[test]
    fn xpath_literal_handles_both_quote_kinds() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(
            xpath_literal(r#"it's "quoted""#),
            r#"concat('it', "'", 's "quoted"')"#
        );
    }
}
