use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::action::{Action, ActionKey};

/// Above this many rendered characters the planner is asked one section at a time.
pub const PLANNER_MAX_CHARS: usize = 15_000;

/// Raw page markup handed to the section extractor is cut at this length.
pub const MAX_HTML_CHARS: usize = 400_000;

/// What the controller sees at one step. Immutable once captured.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
    /// Screenshot on disk, when snapshot persistence is enabled.
    pub visual_ref: Option<PathBuf>,
    pub step_index: usize,
}

impl PageSnapshot {
    pub fn signature(&self) -> StateSignature {
        StateSignature::new(&self.url, self.html.len())
    }
}

/// A semantically coherent slice of a form, flattened for the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSection {
    pub title: Option<String>,
    pub body_text: String,
}

impl FormSection {
    /// The text sent to the planner: the title as a header line, then the body.
    pub fn render(&self) -> String {
        match &self.title {
            Some(title) => format!("{}:\n{}", title, self.body_text),
            None => self.body_text.clone(),
        }
    }
}

/// `(url, content length)` of a captured page; a repeat means the session is looping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateSignature {
    pub url: String,
    pub content_len: usize,
}

impl StateSignature {
    pub fn new(url: &str, content_len: usize) -> Self {
        Self {
            url: url.to_string(),
            content_len,
        }
    }
}

/// Files the session may upload once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Resume,
    CoverLetter,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Resume, ArtifactKind::CoverLetter];

    /// Placeholder token (without brackets) that resolves to this artifact's path.
    pub fn token(self) -> &'static str {
        match self {
            ArtifactKind::Resume => "RESUME_PATH",
            ArtifactKind::CoverLetter => "COVER_LETTER_PATH",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Resume => &["resume", "résumé", "resumé", "cv"],
            ArtifactKind::CoverLetter => &["cover letter", "coverletter", "cover-letter"],
        }
    }

    /// Which artifact an action is about, judged by its value's placeholder
    /// first and its field description second.
    pub fn targeted_by(action: &Action) -> Option<ArtifactKind> {
        if let Some(value) = &action.value {
            for kind in Self::ALL {
                if value.contains(&format!("[{}]", kind.token())) {
                    return Some(kind);
                }
            }
        }
        let field = action.field.to_lowercase();
        // Cover letter first: its descriptions often mention the resume too.
        [ArtifactKind::CoverLetter, ArtifactKind::Resume]
            .into_iter()
            .find(|kind| kind.keywords().iter().any(|kw| contains_word(&field, kw)))
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// One post-action observation kept for the stuck heuristic.
#[derive(Debug, Clone)]
pub struct StepObservation {
    pub step_index: usize,
    pub url: String,
    pub page_text: String,
}

/// Everything the controller remembers within one run. Never persisted.
#[derive(Debug, Default)]
pub struct SessionState {
    pub step_index: usize,
    pub visited_signatures: HashSet<StateSignature>,
    pub executed_action_keys: HashSet<ActionKey>,
    pub uploaded_artifacts: HashSet<ArtifactKind>,
    pub history: Vec<StepObservation>,
}
