//! Section extraction: turns raw page markup into the compact, ordered text
//! the planner reads.
//!
//! Every interactive control collapses into a one-line placeholder token:
//!   `[INPUT: type=file, name=resume, file upload]`
//!   `[TEXTAREA, name=notes, placeholder=Anything else?]`
//!   `[SELECT, name=country, options=A, B, C, ... (+5 more options)]`
//!   `[BUTTON: Continue]`
//! Hidden inputs and buttons without text are dropped; page chrome (scripts,
//! navigation, headers, footers) never reaches the output.

use once_cell::sync::Lazy;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

use crate::types::FormSection;

const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "header", "footer", "nav", "aside",
];
const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Selects with more options than this are summarised.
const SELECT_FULL_LIMIT: usize = 5;
const SELECT_PREVIEW: usize = 3;

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid selector"));
static LEGEND: Lazy<Selector> = Lazy::new(|| Selector::parse("legend").expect("valid selector"));
static OPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("option").expect("valid selector"));

/// Extract the ordered form sections of a page.
///
/// One section per `<fieldset>`; without fieldsets, the first `<form>` or
/// else the whole `<body>` becomes the single section. Sections with no text
/// are omitted, so an empty result means the page has nothing left to fill.
pub fn extract(html: &str) -> Vec<FormSection> {
    let document = Html::parse_document(html);
    let elements = content_elements(&document);

    let fieldsets: Vec<usize> = elements
        .iter()
        .enumerate()
        .filter(|(_, el)| el.value().name() == "fieldset")
        .map(|(i, _)| i)
        .collect();

    let containers = if !fieldsets.is_empty() {
        fieldsets
    } else {
        let form = elements.iter().position(|el| el.value().name() == "form");
        let body = elements.iter().position(|el| el.value().name() == "body");
        form.or(body).into_iter().collect()
    };

    containers
        .into_iter()
        .filter_map(|idx| build_section(&elements, idx))
        .collect()
}

/// The visible text of a page with controls rendered as placeholders, one
/// fragment per line. Used by the completion and stagnation heuristics.
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    match document.select(&BODY).next() {
        Some(body) => flatten(body, &mut lines),
        None => flatten(document.root_element(), &mut lines),
    }
    lines.join("\n")
}

/// Text of the first `<h1>`, if any.
pub fn page_heading(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&H1)
        .map(text_of)
        .find(|text| !text.is_empty())
}

/// Cut `html` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(html: &str, max_chars: usize) -> &str {
    match html.char_indices().nth(max_chars) {
        Some((idx, _)) => &html[..idx],
        None => html,
    }
}

/// All elements outside stripped subtrees, in document order.
fn content_elements(document: &Html) -> Vec<ElementRef<'_>> {
    fn walk<'a>(el: ElementRef<'a>, out: &mut Vec<ElementRef<'a>>) {
        if STRIPPED_TAGS.contains(&el.value().name()) {
            return;
        }
        out.push(el);
        for child in el.children().filter_map(ElementRef::wrap) {
            walk(child, out);
        }
    }

    let mut out = Vec::new();
    walk(document.root_element(), &mut out);
    out
}

fn build_section(elements: &[ElementRef<'_>], idx: usize) -> Option<FormSection> {
    let container = elements[idx];
    let title = explicit_title(container).or_else(|| preceding_heading(&elements[..idx]));

    let mut lines = Vec::new();
    flatten(container, &mut lines);
    if lines.is_empty() {
        return None;
    }

    Some(FormSection {
        title,
        body_text: lines.join("\n"),
    })
}

/// `aria-label` of a fieldset, overridden by a non-empty `<legend>`.
fn explicit_title(container: ElementRef<'_>) -> Option<String> {
    if container.value().name() != "fieldset" {
        return None;
    }
    let from_legend = container
        .select(&LEGEND)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty());
    let from_label = container
        .value()
        .attr("aria-label")
        .map(collapse)
        .filter(|t| !t.is_empty());
    from_legend.or(from_label)
}

fn preceding_heading(before: &[ElementRef<'_>]) -> Option<String> {
    before
        .iter()
        .rev()
        .filter(|el| HEADING_TAGS.contains(&el.value().name()))
        .map(|el| text_of(*el))
        .find(|t| !t.is_empty())
}

fn flatten(el: ElementRef<'_>, lines: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text = collapse(text);
                if !text.is_empty() {
                    lines.push(text);
                }
            }
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if STRIPPED_TAGS.contains(&child.value().name()) {
                    continue;
                }
                match placeholder(child) {
                    Control::Token(token) => lines.push(token),
                    Control::Dropped => {}
                    Control::NotAControl => flatten(child, lines),
                }
            }
            _ => {}
        }
    }
}

enum Control {
    Token(String),
    Dropped,
    NotAControl,
}

fn placeholder(el: ElementRef<'_>) -> Control {
    let attr = |name: &str| {
        el.value()
            .attr(name)
            .map(collapse)
            .filter(|v| !v.is_empty())
    };

    match el.value().name() {
        "input" => {
            let kind = attr("type")
                .map(|t| t.to_lowercase())
                .unwrap_or_else(|| "text".to_string());
            if kind == "hidden" {
                return Control::Dropped;
            }
            let mut token = format!("[INPUT: type={kind}");
            if let Some(name) = attr("name") {
                token.push_str(&format!(", name={name}"));
            }
            if let Some(hint) = attr("placeholder") {
                token.push_str(&format!(", placeholder={hint}"));
            }
            if kind == "radio" || kind == "checkbox" {
                if let Some(value) = attr("value") {
                    let lower = value.to_lowercase();
                    if lower != "on" && lower != "off" {
                        token.push_str(&format!(", value={value}"));
                    }
                }
            }
            if kind == "file" {
                token.push_str(", file upload");
            }
            token.push(']');
            Control::Token(token)
        }
        "textarea" => {
            let mut token = "[TEXTAREA".to_string();
            if let Some(name) = attr("name") {
                token.push_str(&format!(", name={name}"));
            }
            if let Some(hint) = attr("placeholder") {
                token.push_str(&format!(", placeholder={hint}"));
            }
            token.push(']');
            Control::Token(token)
        }
        "button" => {
            // HTML buttons default to submit; reset buttons are never worth planning.
            let kind = attr("type")
                .map(|t| t.to_lowercase())
                .unwrap_or_else(|| "submit".to_string());
            let text = text_of(el);
            if (kind == "submit" || kind == "button") && !text.is_empty() {
                Control::Token(format!("[BUTTON: {text}]"))
            } else {
                Control::Dropped
            }
        }
        "select" => {
            let options: Vec<String> = el
                .select(&OPTION)
                .map(text_of)
                .filter(|t| !t.is_empty())
                .collect();
            let mut token = "[SELECT".to_string();
            if let Some(name) = attr("name") {
                token.push_str(&format!(", name={name}"));
            }
            if !options.is_empty() {
                token.push_str(", options=");
                token.push_str(&summarize_options(&options));
            }
            token.push(']');
            Control::Token(token)
        }
        _ => Control::NotAControl,
    }
}

fn summarize_options(options: &[String]) -> String {
    if options.len() > SELECT_FULL_LIMIT {
        format!(
            "{}, ... (+{} more options)",
            options[..SELECT_PREVIEW].join(", "),
            options.len() - SELECT_PREVIEW
        )
    } else {
        options.join(", ")
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    collapse(&el.text().collect::<Vec<_>>().join(" "))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
