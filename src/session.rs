//! The control loop that walks an application form one page at a time.
//!
//! ```text
//! Navigating -> Capturing -> Evaluating -> Planning -> Executing -> Verifying
//!                   ^                                                  |
//!                   +--------------------------------------------------+
//! ```
//!
//! Every phase may end the run. Browser calls block and run on the blocking
//! pool; the planner is awaited directly.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::action::{Action, Playbook};
use crate::brain::Planner;
use crate::capture::SnapshotWriter;
use crate::config::SessionConfig;
use crate::dom;
use crate::error::DriverError;
use crate::executor::{ActionStatus, BatchReport, Executor, ProfileValues};
use crate::face::SessionEvent;
use crate::hands::Browser;
use crate::judge::ProgressJudge;
use crate::playbook::{PlaybookStore, site_key};
use crate::sanitize::sanitize;
use crate::types::{ArtifactKind, FormSection, PageSnapshot, SessionState, StateSignature, StepObservation};
use crate::wait::poll_until;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Stagnated,
    Looped,
    StepLimitReached,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Stagnated => "stagnated",
            SessionStatus::Looped => "looped",
            SessionStatus::StepLimitReached => "step-limit-reached",
            SessionStatus::Failed => "failed",
        })
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub status: SessionStatus,
    /// Pages captured.
    pub steps: usize,
    pub last_url: Option<String>,
    pub reason: Option<String>,
    pub uploaded: Vec<ArtifactKind>,
    pub executed_actions: usize,
}

enum Phase {
    Navigating,
    Capturing,
    Evaluating(PageSnapshot),
    Planning(PageSnapshot, Vec<FormSection>),
    Executing(StateSignature, Vec<Action>),
    Verifying(StateSignature),
    Finished(SessionStatus, Option<String>),
}

pub struct SessionController {
    browser: Arc<dyn Browser>,
    planner: Arc<dyn Planner>,
    store: Arc<dyn PlaybookStore>,
    judge: Arc<dyn ProgressJudge>,
    executor: Executor,
    profile: Arc<ProfileValues>,
    config: SessionConfig,
    events: Option<broadcast::Sender<SessionEvent>>,
    snapshots: Option<SnapshotWriter>,
    state: SessionState,
    last_url: Option<String>,
    executed_actions: usize,
    /// Sites whose stored playbook could not be read. Writing one back would
    /// replace the cached actions with only this run's, so they stay unsaved.
    unreadable_sites: HashSet<String>,
}

impl SessionController {
    pub fn new(
        browser: Arc<dyn Browser>,
        planner: Arc<dyn Planner>,
        store: Arc<dyn PlaybookStore>,
        judge: Arc<dyn ProgressJudge>,
        profile: ProfileValues,
        config: SessionConfig,
    ) -> Self {
        let executor = Executor::new(browser.clone(), config.action_settle);
        Self {
            browser,
            planner,
            store,
            judge,
            executor,
            profile: Arc::new(profile),
            config,
            events: None,
            snapshots: None,
            state: SessionState::default(),
            last_url: None,
            executed_actions: 0,
            unreadable_sites: HashSet::new(),
        }
    }

    /// Publish progress to the run monitor.
    pub fn with_events(mut self, events: broadcast::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the loop to a terminal state.
    pub async fn run(mut self) -> SessionReport {
        let mut phase = Phase::Navigating;
        let (status, reason) = loop {
            phase = match phase {
                Phase::Navigating => self.navigate().await,
                Phase::Capturing => self.capture().await,
                Phase::Evaluating(snapshot) => self.evaluate(snapshot),
                Phase::Planning(snapshot, sections) => self.plan(snapshot, sections).await,
                Phase::Executing(before, batch) => self.execute(before, batch).await,
                Phase::Verifying(before) => self.verify(before).await,
                Phase::Finished(status, reason) => break (status, reason),
            };
        };

        match status {
            SessionStatus::Failed => {
                error!(steps = self.state.step_index, reason = reason.as_deref().unwrap_or(""), "session failed")
            }
            _ => info!(%status, steps = self.state.step_index, reason = reason.as_deref().unwrap_or(""), "session finished"),
        }
        self.emit(SessionEvent::Finished {
            status: status.to_string(),
            steps: self.state.step_index,
            last_url: self.last_url.clone(),
            reason: reason.clone(),
        });

        let mut uploaded: Vec<ArtifactKind> = self.state.uploaded_artifacts.iter().copied().collect();
        uploaded.sort_by_key(|kind| kind.token());
        SessionReport {
            status,
            steps: self.state.step_index,
            last_url: self.last_url,
            reason,
            uploaded,
            executed_actions: self.executed_actions,
        }
    }

    async fn navigate(&mut self) -> Phase {
        let target = self.config.target_url.clone();
        info!(url = %target, "opening target");
        let url = target.clone();
        if let Err(e) = self.blocking(move |browser| browser.navigate(&url)).await {
            return failed(format!("could not open {target}: {e}"));
        }
        self.last_url = Some(target);
        self.settle_transition().await;

        if let Some(dir) = self.config.snapshot_dir.clone() {
            let heading = match self.blocking(|browser| browser.page_source()).await {
                Ok(html) => dom::page_heading(&html),
                Err(e) => {
                    warn!(error = %e, "could not read landing page for the job title");
                    None
                }
            };
            let writer = SnapshotWriter::new(&dir, heading.as_deref().unwrap_or("job"));
            info!(dir = %writer.dir().display(), "saving page snapshots");
            self.snapshots = Some(writer);
        }

        let Some(entry) = self.config.entry.clone() else {
            return Phase::Capturing;
        };

        let kind = entry.selector_kind;
        let policy = entry.poll;
        let selector = entry.selector.clone();
        let found = self
            .blocking(move |browser| {
                Ok(poll_until(policy, |attempt| {
                    match browser.find_element(kind, &selector) {
                        Ok(_) => Some(()),
                        Err(e) => {
                            debug!(attempt, error = %e, "entry control not there yet");
                            None
                        }
                    }
                }))
            })
            .await;
        match found {
            Ok(Some(())) => {}
            Ok(None) => return failed("entry control never appeared".to_string()),
            Err(e) => return failed(e.to_string()),
        }

        let executor = self.executor.clone();
        let profile = self.profile.clone();
        let click = Action::click(kind, &entry.selector, "Apply");
        let clicked = tokio::task::spawn_blocking(move || executor.execute(&click, &profile)).await;
        match clicked {
            Ok(Ok(_)) => info!("entered application form"),
            Ok(Err(e)) => return failed(format!("could not open the application form: {e}")),
            Err(e) => return failed(format!("entry click panicked: {e}")),
        }
        self.settle_transition().await;
        Phase::Capturing
    }

    async fn capture(&mut self) -> Phase {
        if self.state.step_index >= self.config.max_steps {
            return Phase::Finished(
                SessionStatus::StepLimitReached,
                Some(format!("stopped after {} steps", self.config.max_steps)),
            );
        }
        self.state.step_index += 1;
        let step = self.state.step_index;

        let writer = self.snapshots.clone();
        let captured = self
            .blocking(move |browser| {
                let url = browser.current_url()?;
                let html = browser.page_source()?;
                let visual_ref = writer.and_then(|writer| {
                    let png = match browser.screenshot_png() {
                        Ok(png) => Some(png),
                        Err(e) => {
                            warn!(error = %e, "screenshot failed");
                            None
                        }
                    };
                    match writer.save(&format!("step_{step}"), &html, png.as_deref()) {
                        Ok(path) => path,
                        Err(e) => {
                            warn!(error = %e, "could not save snapshot");
                            None
                        }
                    }
                });
                Ok(PageSnapshot {
                    url,
                    html,
                    visual_ref,
                    step_index: step,
                })
            })
            .await;

        let snapshot = match captured {
            Ok(snapshot) => snapshot,
            Err(e) => return failed(format!("capture failed: {e}")),
        };
        self.last_url = Some(snapshot.url.clone());
        info!(step, url = %snapshot.url, bytes = snapshot.html.len(), "captured page");
        self.emit(SessionEvent::StepStarted {
            step,
            url: snapshot.url.clone(),
        });

        let signature = snapshot.signature();
        if !self.state.visited_signatures.insert(signature) {
            return Phase::Finished(
                SessionStatus::Looped,
                Some(format!("page state repeated at {}", snapshot.url)),
            );
        }
        Phase::Evaluating(snapshot)
    }

    fn evaluate(&mut self, snapshot: PageSnapshot) -> Phase {
        let html = dom::truncate_chars(&snapshot.html, self.config.max_html_chars);
        let sections = dom::extract(html);
        if sections.is_empty() {
            return Phase::Finished(SessionStatus::Completed, Some("no form sections left".to_string()));
        }
        if self.judge.is_complete(&dom::page_text(html)) {
            return Phase::Finished(SessionStatus::Completed, Some("submission confirmed".to_string()));
        }
        debug!(sections = sections.len(), "form sections extracted");
        Phase::Planning(snapshot, sections)
    }

    async fn plan(&mut self, snapshot: PageSnapshot, sections: Vec<FormSection>) -> Phase {
        let site = site_key(&snapshot.url);
        let mut playbook = match self.store.get(&site) {
            Ok(Some(playbook)) => playbook,
            Ok(None) => Playbook::new(&site),
            Err(e) => {
                warn!(site = %site, error = %e, "could not load playbook; planning without it and leaving it untouched");
                self.unreadable_sites.insert(site.clone());
                Playbook::new(&site)
            }
        };

        let fresh = self.fresh(playbook.actions.iter().cloned());
        if !fresh.is_empty() {
            info!(site = %site, actions = fresh.len(), "replaying playbook");
            self.emit(SessionEvent::PlanReady {
                step: snapshot.step_index,
                actions: fresh.len(),
                from_playbook: true,
            });
            return Phase::Executing(snapshot.signature(), fresh);
        }

        info!(site = %site, sections = sections.len(), "asking planner");
        let raw: Vec<Value> = match self.planner.plan(&sections, snapshot.visual_ref.as_deref()).await {
            Ok(raw) => raw,
            Err(e) => return failed(format!("planner failed: {e}")),
        };
        let planned = sanitize(&raw);
        if planned.is_empty() {
            return failed(format!("planner returned no usable actions ({} raw)", raw.len()));
        }

        let added = playbook.extend_new(planned.iter().cloned());
        if self.unreadable_sites.contains(&site) {
            debug!(site = %site, added = added.len(), "not saving over an unreadable playbook");
        } else if !added.is_empty() {
            match self.store.put(&site, &playbook) {
                Ok(()) => info!(site = %site, added = added.len(), total = playbook.actions.len(), "playbook extended"),
                Err(e) => warn!(site = %site, error = %e, "could not save playbook"),
            }
        }

        let batch = self.fresh(planned);
        self.emit(SessionEvent::PlanReady {
            step: snapshot.step_index,
            actions: batch.len(),
            from_playbook: false,
        });
        if batch.is_empty() {
            info!("every planned action already ran this session");
        }
        Phase::Executing(snapshot.signature(), batch)
    }

    async fn execute(&mut self, before: StateSignature, batch: Vec<Action>) -> Phase {
        let executor = self.executor.clone();
        let profile = self.profile.clone();
        let uploaded = self.state.uploaded_artifacts.clone();
        let report: BatchReport =
            match tokio::task::spawn_blocking(move || executor.run_batch(&batch, &profile, &uploaded)).await {
                Ok(report) => report,
                Err(e) => return failed(format!("executor panicked: {e}")),
            };

        for outcome in &report.outcomes {
            self.state.executed_action_keys.insert(outcome.key.clone());
            match outcome.status {
                ActionStatus::Executed => {
                    self.executed_actions += 1;
                    self.emit(SessionEvent::ActionExecuted {
                        field: outcome.field.clone(),
                        kind: outcome.kind.as_str().to_string(),
                    });
                }
                ActionStatus::SkippedUnknownKind => self.emit(SessionEvent::ActionSkipped {
                    field: outcome.field.clone(),
                    reason: "unknown action kind".to_string(),
                }),
                ActionStatus::SkippedArtifact(kind) => self.emit(SessionEvent::ActionSkipped {
                    field: outcome.field.clone(),
                    reason: format!("{} already uploaded", kind.token()),
                }),
            }
        }
        self.state.uploaded_artifacts.extend(report.uploaded.iter().copied());

        match report.failure {
            Some(e) => failed(e.to_string()),
            None => Phase::Verifying(before),
        }
    }

    async fn verify(&mut self, before: StateSignature) -> Phase {
        self.settle_transition().await;

        let policy = self.config.change_poll;
        let polled = self
            .blocking(move |browser| {
                if policy.is_disabled() {
                    return Ok((true, browser.current_url()?, browser.page_source()?));
                }
                let mut last = None;
                let changed = poll_until(policy, |attempt| {
                    let url = browser.current_url().ok()?;
                    let html = browser.page_source().ok()?;
                    let now = StateSignature::new(&url, html.len());
                    if now != before {
                        debug!(attempt, "page changed");
                        return Some((url, html));
                    }
                    last = Some((url, html));
                    None
                });
                match (changed, last) {
                    (Some((url, html)), _) => Ok((true, url, html)),
                    (None, Some((url, html))) => Ok((false, url, html)),
                    (None, None) => Ok((false, browser.current_url()?, browser.page_source()?)),
                }
            })
            .await;

        let (changed, url, html) = match polled {
            Ok(polled) => polled,
            Err(e) => return failed(format!("could not read page after actions: {e}")),
        };
        self.last_url = Some(url.clone());

        let text = dom::page_text(dom::truncate_chars(&html, self.config.max_html_chars));
        if self.judge.is_complete(&text) {
            return Phase::Finished(SessionStatus::Completed, Some("submission confirmed".to_string()));
        }
        if !changed {
            return Phase::Finished(
                SessionStatus::Stagnated,
                Some(format!("page did not change after {} checks", policy.attempts)),
            );
        }
        if self.judge.is_stuck(&text, &self.state.history) {
            return Phase::Finished(
                SessionStatus::Stagnated,
                Some("the same upload prompts keep coming back".to_string()),
            );
        }

        self.state.history.push(StepObservation {
            step_index: self.state.step_index,
            url,
            page_text: text,
        });
        Phase::Capturing
    }

    /// Actions not yet run this session, in order, each key at most once.
    fn fresh(&self, actions: impl IntoIterator<Item = Action>) -> Vec<Action> {
        let mut seen = HashSet::new();
        actions
            .into_iter()
            .filter(|action| {
                let key = action.key();
                !self.state.executed_action_keys.contains(&key) && seen.insert(key)
            })
            .collect()
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn settle_transition(&self) {
        if !self.config.transition_settle.is_zero() {
            tokio::time::sleep(self.config.transition_settle).await;
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Browser) -> Result<T, DriverError> + Send + 'static,
    {
        let browser = self.browser.clone();
        tokio::task::spawn_blocking(move || f(browser.as_ref()))
            .await
            .map_err(|e| DriverError::Other(format!("browser task panicked: {e}")))?
    }
}

fn failed(reason: String) -> Phase {
    Phase::Finished(SessionStatus::Failed, Some(reason))
}
