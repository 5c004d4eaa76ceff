//! Scripted browser and planner doubles for driving the executor and the
//! session controller without Chrome or a model.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::action::SelectorKind;
use crate::brain::Planner;
use crate::error::{DriverError, PlanError};
use crate::hands::{Browser, PageElement};
use crate::types::FormSection;

#[derive(Debug, Clone)]
pub struct FakePage {
    pub url: String,
    pub html: String,
    /// Every read of the source grows it by one byte, so the page never
    /// looks the same twice.
    pub ticking: bool,
}

impl FakePage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            html: html.to_string(),
            ticking: false,
        }
    }

    pub fn ticking(mut self) -> Self {
        self.ticking = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickBehavior {
    Normal,
    NeverInteractable,
    Intercepted,
    InteractableAfterScroll,
}

#[derive(Debug, Clone)]
pub struct FakeControl {
    click: ClickBehavior,
    has_value: bool,
    displayed: bool,
    navigates_to: Option<usize>,
    scrolled: bool,
}

impl FakeControl {
    pub fn clickable(click: ClickBehavior) -> Self {
        Self {
            click,
            has_value: false,
            displayed: true,
            navigates_to: None,
            scrolled: false,
        }
    }

    pub fn text_input() -> Self {
        Self {
            has_value: true,
            ..Self::clickable(ClickBehavior::Normal)
        }
    }

    pub fn file_input(displayed: bool) -> Self {
        Self {
            has_value: true,
            displayed,
            ..Self::clickable(ClickBehavior::Normal)
        }
    }

    /// Clicking moves the browser to page `index`.
    pub fn navigating_to(mut self, index: usize) -> Self {
        self.navigates_to = Some(index);
        self
    }
}

#[derive(Default)]
struct FakeState {
    pages: Vec<FakePage>,
    current: usize,
    ticks: usize,
    controls: HashMap<String, FakeControl>,
    log: Vec<(String, String)>,
    clicks: HashMap<String, usize>,
    source_reads: usize,
}

#[derive(Default)]
pub struct FakeBrowser {
    state: Mutex<FakeState>,
}

impl FakeBrowser {
    pub fn new(pages: Vec<FakePage>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                pages,
                ..FakeState::default()
            }),
        }
    }

    pub fn single_page(url: &str, html: &str) -> Self {
        Self::new(vec![FakePage::new(url, html)])
    }

    pub fn add_control(&self, selector: &str, control: FakeControl) {
        self.lock().controls.insert(selector.to_string(), control);
    }

    pub fn log_for(&self, selector: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(sel, _)| sel == selector)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Clicks that actually landed, by any tier.
    pub fn clicks_on(&self, selector: &str) -> usize {
        self.lock().clicks.get(selector).copied().unwrap_or(0)
    }

    pub fn current_page(&self) -> usize {
        self.lock().current
    }

    pub fn source_reads(&self) -> usize {
        self.lock().source_reads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl FakeState {
    fn record(&mut self, selector: &str, event: &str) {
        self.log.push((selector.to_string(), event.to_string()));
    }

    fn land_click(&mut self, selector: &str) {
        *self.clicks.entry(selector.to_string()).or_default() += 1;
        if let Some(target) = self.controls.get(selector).and_then(|c| c.navigates_to) {
            self.current = target;
            self.ticks = 0;
        }
    }

    fn control(&mut self, selector: &str) -> Result<&mut FakeControl, DriverError> {
        self.controls
            .get_mut(selector)
            .ok_or_else(|| DriverError::NotFound(selector.to_string()))
    }
}

impl Browser for FakeBrowser {
    fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        match state.pages.iter().position(|p| p.url == url) {
            Some(idx) => {
                state.current = idx;
                Ok(())
            }
            None => Err(DriverError::Other(format!("unknown url {url}"))),
        }
    }

    fn current_url(&self) -> Result<String, DriverError> {
        let state = self.lock();
        Ok(state.pages[state.current].url.clone())
    }

    fn page_source(&self) -> Result<String, DriverError> {
        let mut state = self.lock();
        state.source_reads += 1;
        let page = state.pages[state.current].clone();
        if page.ticking {
            state.ticks += 1;
            Ok(format!("{}<!--{}-->", page.html, "t".repeat(state.ticks)))
        } else {
            Ok(page.html)
        }
    }

    fn screenshot_png(&self) -> Result<Vec<u8>, DriverError> {
        Ok(b"\x89PNG fake".to_vec())
    }

    fn find_element<'a>(
        &'a self,
        _kind: SelectorKind,
        selector: &str,
    ) -> Result<Box<dyn PageElement + 'a>, DriverError> {
        let mut state = self.lock();
        state.control(selector)?;
        Ok(Box::new(FakeElement {
            browser: self,
            selector: selector.to_string(),
        }))
    }
}

struct FakeElement<'a> {
    browser: &'a FakeBrowser,
    selector: String,
}

impl PageElement for FakeElement<'_> {
    fn click(&self) -> Result<(), DriverError> {
        let mut state = self.browser.lock();
        state.record(&self.selector, "click");
        let control = state.control(&self.selector)?;
        let outcome = match control.click {
            ClickBehavior::Normal => Ok(()),
            ClickBehavior::NeverInteractable => Err(DriverError::NotInteractable("zero-sized".into())),
            ClickBehavior::Intercepted => Err(DriverError::ClickIntercepted("overlay".into())),
            ClickBehavior::InteractableAfterScroll if control.scrolled => Ok(()),
            ClickBehavior::InteractableAfterScroll => {
                Err(DriverError::NotInteractable("off-screen".into()))
            }
        };
        if outcome.is_ok() {
            state.land_click(&self.selector);
        }
        outcome
    }

    fn clear(&self) -> Result<(), DriverError> {
        let mut state = self.browser.lock();
        state.record(&self.selector, "clear");
        if state.control(&self.selector)?.has_value {
            Ok(())
        } else {
            Err(DriverError::Unsupported("no value".into()))
        }
    }

    fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        let mut state = self.browser.lock();
        state.record(&self.selector, &format!("keys:{text}"));
        Ok(())
    }

    fn set_files(&self, paths: &[String]) -> Result<(), DriverError> {
        let mut state = self.browser.lock();
        state.record(&self.selector, &format!("files:{}", paths.join(",")));
        Ok(())
    }

    fn is_displayed(&self) -> Result<bool, DriverError> {
        let mut state = self.browser.lock();
        state.record(&self.selector, "displayed?");
        Ok(state.control(&self.selector)?.displayed)
    }

    fn run_script(&self, function: &str) -> Result<(), DriverError> {
        let mut state = self.browser.lock();
        if function.contains("scrollIntoView") {
            state.record(&self.selector, "script:scroll");
            state.control(&self.selector)?.scrolled = true;
        } else if function.contains("this.click()") {
            state.record(&self.selector, "script:click");
            state.land_click(&self.selector);
        } else if function.contains("style.display") {
            state.record(&self.selector, "script:display");
            state.control(&self.selector)?.displayed = true;
        } else {
            state.record(&self.selector, "script");
        }
        Ok(())
    }
}

type PlanFn = dyn Fn(&[FormSection]) -> Result<Vec<Value>, PlanError> + Send + Sync;

/// Planner answering from a closure, counting its calls.
pub struct StubPlanner {
    respond: Box<PlanFn>,
    calls: AtomicUsize,
}

impl StubPlanner {
    pub fn new(
        respond: impl Fn(&[FormSection]) -> Result<Vec<Value>, PlanError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(actions: Vec<Value>) -> Self {
        Self::new(move |_| Ok(actions.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for StubPlanner {
    async fn plan(
        &self,
        sections: &[FormSection],
        _visual: Option<&Path>,
    ) -> Result<Vec<Value>, PlanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(sections)
    }
}
