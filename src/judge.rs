use crate::types::StepObservation;

/// Decides, from page text alone, whether the form is finished or the run is
/// going nowhere.
pub trait ProgressJudge: Send + Sync {
    /// The page confirms the application was submitted.
    fn is_complete(&self, page_text: &str) -> bool;

    /// The run keeps landing on the same prompts. `history` holds earlier
    /// post-action observations, oldest first, without the current page.
    fn is_stuck(&self, page_text: &str, history: &[StepObservation]) -> bool;
}

pub const DEFAULT_COMPLETION_PHRASES: &[&str] = &[
    "application submitted",
    "application has been submitted",
    "application was submitted",
    "application has been sent",
    "application was sent",
    "thank you for applying",
    "thanks for applying",
    "successfully submitted",
    "we have received your application",
    "we've received your application",
];

pub const DEFAULT_STUCK_PHRASES: &[&str] = &[
    "upload a resume",
    "upload a résumé",
    "upload a resumé",
    "upload your resume",
    "upload a cover letter",
    "upload your cover letter",
];

/// Case-insensitive phrase matching.
#[derive(Debug, Clone)]
pub struct PhraseJudge {
    completion: Vec<String>,
    stuck: Vec<String>,
    /// Stuck once the stuck prompts have shown on more than this many steps.
    stuck_threshold: usize,
}

impl Default for PhraseJudge {
    fn default() -> Self {
        Self::new(
            DEFAULT_COMPLETION_PHRASES.iter().map(|s| s.to_string()).collect(),
            DEFAULT_STUCK_PHRASES.iter().map(|s| s.to_string()).collect(),
            3,
        )
    }
}

impl PhraseJudge {
    pub fn new(completion: Vec<String>, stuck: Vec<String>, stuck_threshold: usize) -> Self {
        let lower = |v: Vec<String>| v.into_iter().map(|p| p.to_lowercase()).collect();
        Self {
            completion: lower(completion),
            stuck: lower(stuck),
            stuck_threshold,
        }
    }

    fn mentions_stuck_prompt(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.stuck.iter().any(|p| text.contains(p.as_str()))
    }
}

impl ProgressJudge for PhraseJudge {
    fn is_complete(&self, page_text: &str) -> bool {
        let text = page_text.to_lowercase();
        self.completion.iter().any(|p| text.contains(p.as_str()))
    }

    fn is_stuck(&self, page_text: &str, history: &[StepObservation]) -> bool {
        if self.stuck.is_empty() || !self.mentions_stuck_prompt(page_text) {
            return false;
        }
        let earlier = history
            .iter()
            .filter(|obs| self.mentions_stuck_prompt(&obs.page_text))
            .count();
        earlier + 1 > self.stuck_threshold
    }
}
