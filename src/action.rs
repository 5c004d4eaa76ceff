use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Fill,
    Click,
    Upload,
    /// Anything the planner asked for that the executor cannot perform.
    #[serde(other)]
    Unknown,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Fill => "fill",
            ActionKind::Click => "click",
            ActionKind::Upload => "upload",
            ActionKind::Unknown => "unknown",
        }
    }

    pub fn needs_value(self) -> bool {
        matches!(self, ActionKind::Fill | ActionKind::Upload)
    }
}

/// How a selector is resolved against the live page.
///
/// `XPath` is the structural-query form: sanitized `:contains(...)` selectors
/// are always translated into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    #[default]
    Css,
    #[serde(alias = "structural")]
    XPath,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKind::Css => write!(f, "css"),
            SelectorKind::XPath => write!(f, "xpath"),
        }
    }
}

/// One validated UI action. Only the sanitizer constructs these from planner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default)]
    pub selector_kind: SelectorKind,
    pub selector: String,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Action {
    pub fn click(selector_kind: SelectorKind, selector: &str, field: &str) -> Self {
        Self {
            kind: ActionKind::Click,
            selector_kind,
            selector: selector.to_string(),
            field: field.to_string(),
            value: None,
        }
    }

    #[cfg(test)]
    pub fn with_value(kind: ActionKind, selector: &str, field: &str, value: &str) -> Self {
        Self {
            kind,
            selector_kind: SelectorKind::Css,
            selector: selector.to_string(),
            field: field.to_string(),
            value: Some(value.to_string()),
        }
    }

    pub fn key(&self) -> ActionKey {
        ActionKey::of(self)
    }

    /// Label used in logs: the field description, or the selector when the planner gave none.
    pub fn label(&self) -> &str {
        if self.field.trim().is_empty() {
            &self.selector
        } else {
            &self.field
        }
    }
}

/// Fingerprint of `(kind, selector, value)`.
///
/// The value is fingerprinted before placeholder substitution, so the key is
/// stable across sessions with different profile data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionKey(String);

impl ActionKey {
    pub fn of(action: &Action) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(action.kind.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(action.selector.as_bytes());
        hasher.update([0x1f]);
        match &action.value {
            Some(value) => {
                hasher.update([1]);
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0]),
        }
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

/// Cached, ordered list of actions for one site. Append-only within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    pub site_key: String,
    pub actions: Vec<Action>,
}

impl Playbook {
    pub fn new(site_key: &str) -> Self {
        Self {
            site_key: site_key.to_string(),
            actions: Vec::new(),
        }
    }

    pub fn contains(&self, key: &ActionKey) -> bool {
        self.actions.iter().any(|a| &a.key() == key)
    }

    /// Appends every action whose key is not already present and returns the ones added.
    /// Existing entries are never touched.
    pub fn extend_new(&mut self, actions: impl IntoIterator<Item = Action>) -> Vec<Action> {
        let mut added = Vec::new();
        for action in actions {
            let key = action.key();
            if self.contains(&key) || added.iter().any(|a: &Action| a.key() == key) {
                continue;
            }
            added.push(action);
        }
        self.actions.extend(added.iter().cloned());
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_key_depends_on_kind_selector_and_value() {
        let a = Action::with_value(ActionKind::Fill, "#email", "Email", "[EMAIL]");
        let mut b = a.clone();
        b.field = "a different description".into();
        assert_eq!(a.key(), b.key());

        let c = Action::with_value(ActionKind::Fill, "#email", "Email", "[NAME]");
        assert_ne!(a.key(), c.key());

        let d = Action::with_value(ActionKind::Upload, "#email", "Email", "[EMAIL]");
        assert_ne!(a.key(), d.key());
    }

    #[test]
    fn missing_value_differs_from_empty_value() {
        let mut a = Action::click(SelectorKind::Css, "#next", "Next");
        let none = a.key();
        a.value = Some(String::new());
        assert_ne!(none, a.key());
    }

    #[test]
    fn extend_new_only_appends_unseen_actions() {
        let next = Action::click(SelectorKind::Css, "button[type=submit]", "Next");
        let upload = Action::with_value(ActionKind::Upload, "#resume", "Resume", "[RESUME_PATH]");
        let mut playbook = Playbook::new("jobs.example.com");
        playbook.actions.push(next.clone());

        let added = playbook.extend_new(vec![upload.clone(), next.clone(), upload.clone()]);

        assert_eq!(added, vec![upload.clone()]);
        assert_eq!(playbook.actions, vec![next, upload]);
    }

    #[test]
    fn unknown_kind_deserializes() {
        let action: Action =
            serde_json::from_str(r##"{"kind":"hover","selector":"#menu","field":"Menu"}"##).unwrap();
        assert_eq!(action.kind, ActionKind::Unknown);
        assert_eq!(action.selector_kind, SelectorKind::Css);
    }
}
