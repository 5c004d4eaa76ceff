use anyhow::{Context, Result, bail};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::SelectorKind;
use crate::brain::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::executor::ProfileValues;
use crate::hands::ChromeOptions;
use crate::judge::{DEFAULT_COMPLETION_PHRASES, DEFAULT_STUCK_PHRASES, PhraseJudge};
use crate::types::{ArtifactKind, MAX_HTML_CHARS};
use crate::wait::RetryPolicy;

pub const DEFAULT_ENTRY_XPATH: &str = "//a[contains(., 'Apply') or contains(., 'apply')]";

/// Drive a multi-step job application form to completion.
#[derive(Debug, Parser)]
#[command(name = "apply-pilot", version)]
pub struct Args {
    /// Job posting (or application form) URL.
    pub url: String,

    /// Résumé file substituted for [RESUME_PATH].
    #[arg(long, env = "APPLY_PILOT_RESUME")]
    pub resume: Option<PathBuf>,

    /// Cover letter file substituted for [COVER_LETTER_PATH].
    #[arg(long, env = "APPLY_PILOT_COVER_LETTER")]
    pub cover_letter: Option<PathBuf>,

    /// JSON object of placeholder values, e.g. {"NAME": "Jo Bloggs", "EMAIL": "jo@example.com"}.
    #[arg(long, env = "APPLY_PILOT_PROFILE")]
    pub profile: Option<PathBuf>,

    /// Where playbooks are cached, one JSON file per site.
    #[arg(long, env = "APPLY_PILOT_PLAYBOOKS")]
    pub playbook_dir: Option<PathBuf>,

    /// Save every captured page (HTML + screenshot) under this directory.
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub max_steps: usize,

    /// XPath of the control that opens the application form; "none" when the URL is the form itself.
    #[arg(long, default_value = DEFAULT_ENTRY_XPATH)]
    pub entry_xpath: String,

    #[arg(long)]
    pub headless: bool,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Chrome profile directory, so existing logins carry over.
    #[arg(long)]
    pub user_data_dir: Option<PathBuf>,

    /// DevTools endpoint of a running Chrome to attach to instead of launching one.
    #[arg(long)]
    pub attach: Option<String>,

    #[arg(long, env = "APPLY_PILOT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "APPLY_PILOT_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Extra phrase that means the application went through (repeatable).
    #[arg(long = "done-phrase")]
    pub done_phrases: Vec<String>,

    /// Steps on which upload prompts may reappear before the run is abandoned.
    #[arg(long, default_value_t = 3)]
    pub stuck_threshold: usize,

    /// Serve a live run monitor on this port.
    #[arg(long)]
    pub monitor_port: Option<u16>,
}

/// The control that leads from the posting into the form.
#[derive(Debug, Clone)]
pub struct EntryAffordance {
    pub selector_kind: SelectorKind,
    pub selector: String,
    pub poll: RetryPolicy,
}

/// Knobs of the control loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target_url: String,
    pub max_steps: usize,
    /// Pause after every action.
    pub action_settle: Duration,
    /// Pause after anything that may trigger a page transition.
    pub transition_settle: Duration,
    /// Sampling used to notice that executed actions changed the page.
    /// A disabled policy skips the check.
    pub change_poll: RetryPolicy,
    pub entry: Option<EntryAffordance>,
    pub snapshot_dir: Option<PathBuf>,
    pub max_html_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            max_steps: 10,
            action_settle: Duration::from_millis(500),
            transition_settle: Duration::from_secs(2),
            change_poll: RetryPolicy::new(10, Duration::from_secs(1)),
            entry: Some(EntryAffordance {
                selector_kind: SelectorKind::XPath,
                selector: DEFAULT_ENTRY_XPATH.to_string(),
                poll: RetryPolicy::new(20, Duration::from_secs(1)),
            }),
            snapshot_dir: None,
            max_html_chars: MAX_HTML_CHARS,
        }
    }
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let entry = if self.entry_xpath.trim().eq_ignore_ascii_case("none") {
            None
        } else {
            defaults.entry.clone().map(|entry| EntryAffordance {
                selector: self.entry_xpath.clone(),
                ..entry
            })
        };
        SessionConfig {
            target_url: self.url.clone(),
            max_steps: self.max_steps,
            entry,
            snapshot_dir: self.snapshot_dir.clone(),
            ..defaults
        }
    }

    pub fn chrome_options(&self) -> ChromeOptions {
        ChromeOptions {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            user_data_dir: self.user_data_dir.clone(),
            attach_url: self.attach.clone(),
        }
    }

    pub fn judge(&self) -> PhraseJudge {
        let mut completion: Vec<String> =
            DEFAULT_COMPLETION_PHRASES.iter().map(|s| s.to_string()).collect();
        completion.extend(self.done_phrases.iter().cloned());
        PhraseJudge::new(
            completion,
            DEFAULT_STUCK_PHRASES.iter().map(|s| s.to_string()).collect(),
            self.stuck_threshold,
        )
    }

    pub fn playbook_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.playbook_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir().context("no local data directory; pass --playbook-dir")?;
        Ok(base.join("apply-pilot").join("playbooks"))
    }

    /// Placeholder values from the profile file plus the artifact paths.
    pub fn profile_values(&self) -> Result<ProfileValues> {
        let mut values = match &self.profile {
            Some(path) => load_profile(path)?,
            None => ProfileValues::new(),
        };
        for (kind, path) in [
            (ArtifactKind::Resume, &self.resume),
            (ArtifactKind::CoverLetter, &self.cover_letter),
        ] {
            if let Some(path) = path {
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("{} not found: {}", kind.token(), path.display()))?;
                values.insert(kind.token().to_string(), absolute.display().to_string());
            }
        }
        Ok(values)
    }
}

/// Read a flat JSON object of placeholder values. Keys are normalised to
/// upper case without brackets.
pub fn load_profile(path: &Path) -> Result<ProfileValues> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading profile {}", path.display()))?;
    let parsed: HashMap<String, serde_json::Value> =
        serde_json::from_str(&raw).with_context(|| format!("parsing profile {}", path.display()))?;

    let mut values = ProfileValues::new();
    for (key, value) in parsed {
        let token = key.trim().trim_start_matches('[').trim_end_matches(']').to_uppercase();
        let literal = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => bail!("profile value for {} must be a string, got {}", token, other),
        };
        values.insert(token, literal);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_keys_are_normalised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, r#"{"name": "Jo Bloggs", "[EMAIL]": "jo@example.com", "age": 40}"#).unwrap();

        let values = load_profile(&path).unwrap();
        assert_eq!(values["NAME"], "Jo Bloggs");
        assert_eq!(values["EMAIL"], "jo@example.com");
        assert_eq!(values["AGE"], "40");
    }

    #[test]
    fn nested_profile_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, r#"{"address": {"city": "Sydney"}}"#).unwrap();
        assert!(load_profile(&path).is_err());
    }

    #[test]
    fn artifact_paths_join_the_profile() {
        let dir = tempfile::tempdir().unwrap();
        let resume = dir.path().join("resume.pdf");
        std::fs::write(&resume, b"%PDF").unwrap();

        let args = Args::parse_from([
            "apply-pilot",
            "https://jobs.example.com/job/1",
            "--resume",
            resume.to_str().unwrap(),
            "--entry-xpath",
            "none",
        ]);
        let values = args.profile_values().unwrap();
        assert!(values["RESUME_PATH"].ends_with("resume.pdf"));
        assert!(!values.contains_key("COVER_LETTER_PATH"));

        let config = args.session_config();
        assert!(config.entry.is_none());
        assert_eq!(config.max_steps, 10);
    }

    #[test]
    fn missing_resume_is_an_error() {
        let args = Args::parse_from([
            "apply-pilot",
            "https://jobs.example.com/job/1",
            "--resume",
            "/definitely/not/here.pdf",
        ]);
        assert!(args.profile_values().is_err());
    }
}
