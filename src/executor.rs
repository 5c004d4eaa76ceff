//! Performs planned actions against the live page, one at a time.
//!
//! Clicks escalate through three tiers (direct, scrolled into view, script
//! click) because overlays and off-screen controls are routine on real
//! application forms. A missing element or any other driver failure stops the
//! batch: the page no longer matches what the plan assumed.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKey, ActionKind};
use crate::error::{DriverError, ExecError};
use crate::hands::{Browser, PageElement};
use crate::types::ArtifactKind;

/// Placeholder token (without brackets) → literal, e.g. `EMAIL` → `jo@example.com`.
pub type ProfileValues = HashMap<String, String>;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Z][A-Z0-9_]*)\]").expect("valid regex"));

const SCROLL_INTO_VIEW_FN: &str =
    "function() { this.scrollIntoView({ block: 'center', inline: 'center' }); }";
const FORCE_CLICK_FN: &str = "function() { this.click(); }";
const FORCE_DISPLAY_FN: &str = "function() { this.style.display = 'block'; \
    this.style.visibility = 'visible'; this.style.opacity = '1'; \
    this.removeAttribute('hidden'); }";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Performed {
    Done,
    /// Unknown action kind; nothing was sent to the page.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Executed,
    SkippedUnknownKind,
    /// Its artifact was already uploaded this session.
    SkippedArtifact(ArtifactKind),
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub key: ActionKey,
    pub field: String,
    pub kind: ActionKind,
    pub status: ActionStatus,
}

/// What a batch did before it finished or failed.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ActionOutcome>,
    pub uploaded: Vec<ArtifactKind>,
    pub failure: Option<ExecError>,
}

impl BatchReport {
    pub fn executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == ActionStatus::Executed)
            .count()
    }
}

#[derive(Clone)]
pub struct Executor {
    browser: Arc<dyn Browser>,
    settle: Duration,
}

impl Executor {
    pub fn new(browser: Arc<dyn Browser>, settle: Duration) -> Self {
        Self { browser, settle }
    }

    /// Run `batch` in order, skipping actions whose artifact is already uploaded.
    /// Stops at the first fatal error.
    pub fn run_batch(
        &self,
        batch: &[Action],
        profile: &ProfileValues,
        already_uploaded: &HashSet<ArtifactKind>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut uploaded = already_uploaded.clone();

        for (idx, action) in batch.iter().enumerate() {
            let artifact = ArtifactKind::targeted_by(action);
            let outcome = |status| ActionOutcome {
                key: action.key(),
                field: action.label().to_string(),
                kind: action.kind,
                status,
            };

            if let Some(kind) = artifact.filter(|k| uploaded.contains(k)) {
                info!(step = idx + 1, field = action.label(), artifact = ?kind, "artifact already uploaded, skipping");
                report.outcomes.push(outcome(ActionStatus::SkippedArtifact(kind)));
                continue;
            }

            info!(step = idx + 1, kind = action.kind.as_str(), field = action.label(), "executing action");
            match self.execute(action, profile) {
                Ok(Performed::Done) => {
                    if action.kind == ActionKind::Upload {
                        if let Some(kind) = artifact {
                            uploaded.insert(kind);
                            report.uploaded.push(kind);
                        }
                    }
                    report.outcomes.push(outcome(ActionStatus::Executed));
                }
                Ok(Performed::Skipped) => {
                    report.outcomes.push(outcome(ActionStatus::SkippedUnknownKind));
                }
                Err(e) => {
                    warn!(field = action.label(), error = %e, "action failed; aborting batch");
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report
    }

    /// Resolve and perform one action, then wait the settle delay.
    pub fn execute(&self, action: &Action, profile: &ProfileValues) -> Result<Performed, ExecError> {
        if action.kind == ActionKind::Unknown {
            warn!(field = action.label(), selector = %action.selector, "unknown action kind, skipping");
            return Ok(Performed::Skipped);
        }

        let value = match &action.value {
            Some(raw) => Some(resolve_placeholders(raw, profile, action)?),
            None => None,
        };

        let element = self
            .browser
            .find_element(action.selector_kind, &action.selector)
            .map_err(|e| to_exec_error(e, action))?;

        let result = match action.kind {
            ActionKind::Click => click(element.as_ref(), action),
            ActionKind::Fill => fill(element.as_ref(), action, value.as_deref().unwrap_or("")),
            ActionKind::Upload => upload(element.as_ref(), action, value.as_deref().unwrap_or("")),
            ActionKind::Unknown => Ok(()),
        };
        result.map_err(|e| to_exec_error(e, action))?;

        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        Ok(Performed::Done)
    }
}

/// Replace every `[TOKEN]` in `raw` with its profile value.
pub fn resolve_placeholders(
    raw: &str,
    profile: &ProfileValues,
    action: &Action,
) -> Result<String, ExecError> {
    let mut missing = None;
    let resolved = PLACEHOLDER.replace_all(raw, |caps: &Captures| {
        let token = &caps[1];
        match profile.get(token) {
            Some(literal) => literal.clone(),
            None => {
                missing.get_or_insert_with(|| token.to_string());
                caps[0].to_string()
            }
        }
    });
    match missing {
        Some(token) => Err(ExecError::UnresolvedPlaceholder {
            field: action.label().to_string(),
            token,
        }),
        None => Ok(resolved.into_owned()),
    }
}

fn click(element: &dyn PageElement, action: &Action) -> Result<(), DriverError> {
    match element.click() {
        Ok(()) => Ok(()),
        Err(DriverError::NotInteractable(reason)) => {
            warn!(field = action.label(), %reason, "not interactable; scrolling into view and retrying");
            element.run_script(SCROLL_INTO_VIEW_FN)?;
            match element.click() {
                Ok(()) => Ok(()),
                Err(DriverError::NotFound(reason)) => Err(DriverError::NotFound(reason)),
                Err(e) => {
                    warn!(field = action.label(), error = %e, "retry failed; forcing script click");
                    element.run_script(FORCE_CLICK_FN)
                }
            }
        }
        Err(DriverError::ClickIntercepted(reason)) => {
            warn!(field = action.label(), %reason, "click intercepted; forcing script click");
            element.run_script(FORCE_CLICK_FN)
        }
        Err(e) => Err(e),
    }
}

fn fill(element: &dyn PageElement, action: &Action, value: &str) -> Result<(), DriverError> {
    if let Err(e) = element.clear() {
        debug!(field = action.label(), error = %e, "clear not applicable");
    }
    element.send_keys(value)?;
    info!(field = action.label(), "entered text");
    Ok(())
}

fn upload(element: &dyn PageElement, action: &Action, path: &str) -> Result<(), DriverError> {
    match element.is_displayed() {
        Ok(true) => {}
        Ok(false) => {
            if let Err(e) = element.run_script(FORCE_DISPLAY_FN) {
                warn!(field = action.label(), error = %e, "could not unhide file input; uploading regardless");
            }
        }
        Err(e) => debug!(field = action.label(), error = %e, "visibility check failed"),
    }
    element.set_files(&[path.to_string()])?;
    info!(field = action.label(), path, "uploaded file");
    Ok(())
}

fn to_exec_error(e: DriverError, action: &Action) -> ExecError {
    match e {
        DriverError::NotFound(_) => ExecError::ElementNotFound {
            field: action.label().to_string(),
            selector: action.selector.clone(),
        },
        source => ExecError::Driver {
            field: action.label().to_string(),
            source,
        },
    }
}
