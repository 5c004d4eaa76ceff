use anyhow::Result;
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser as ChromeProcess, Element, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::action::SelectorKind;
use crate::error::DriverError;

/// What the automation core needs from a browser. Calls block; the session
/// controller runs them on the blocking pool.
pub trait Browser: Send + Sync {
    fn navigate(&self, url: &str) -> Result<(), DriverError>;
    fn current_url(&self) -> Result<String, DriverError>;
    fn page_source(&self) -> Result<String, DriverError>;
    fn screenshot_png(&self) -> Result<Vec<u8>, DriverError>;
    fn find_element<'a>(
        &'a self,
        kind: SelectorKind,
        selector: &str,
    ) -> Result<Box<dyn PageElement + 'a>, DriverError>;
}

/// A resolved element on the live page.
pub trait PageElement {
    fn click(&self) -> Result<(), DriverError>;
    /// Clears the current value. Elements without one return `Unsupported`.
    fn clear(&self) -> Result<(), DriverError>;
    fn send_keys(&self, text: &str) -> Result<(), DriverError>;
    fn set_files(&self, paths: &[String]) -> Result<(), DriverError>;
    fn is_displayed(&self) -> Result<bool, DriverError>;
    /// Runs `function() { ... }` with the element bound to `this`.
    fn run_script(&self, function: &str) -> Result<(), DriverError>;
}

/// How to get hold of Chrome.
#[derive(Debug, Clone, Default)]
pub struct ChromeOptions {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    /// DevTools endpoint of an already running Chrome to attach to first.
    pub attach_url: Option<String>,
}

/// A Chrome tab driven over the DevTools protocol.
pub struct ChromeBrowser {
    _process: ChromeProcess,
    tab: Arc<Tab>,
}

impl ChromeBrowser {
    pub fn launch(options: &ChromeOptions) -> Result<Self> {
        if let Some(endpoint) = &options.attach_url {
            info!(%endpoint, "attempting to attach to running Chrome");
            match ChromeProcess::connect(endpoint.clone()) {
                Ok(process) => {
                    let tab = process.new_tab()?;
                    info!("attached to existing Chrome");
                    return Ok(Self {
                        _process: process,
                        tab,
                    });
                }
                Err(e) => warn!(error = %e, "could not attach; launching a new Chrome"),
            }
        }

        let launch = LaunchOptions {
            headless: options.headless,
            path: options.chrome_path.clone(),
            user_data_dir: options.user_data_dir.clone(),
            window_size: Some((1280, 900)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--disable-notifications"),
            ],
            idle_browser_timeout: std::time::Duration::from_secs(300),
            ..Default::default()
        };

        info!(headless = options.headless, "starting Chrome");
        let process = ChromeProcess::new(launch)
            .map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
        let tab = process.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _process: process,
            tab,
        })
    }
}

impl Browser for ChromeBrowser {
    fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.tab.navigate_to(url).map_err(other)?;
        self.tab.wait_until_navigated().map_err(other)?;
        Ok(())
    }

    fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.tab.get_url())
    }

    fn page_source(&self) -> Result<String, DriverError> {
        self.tab.get_content().map_err(other)
    }

    fn screenshot_png(&self) -> Result<Vec<u8>, DriverError> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(other)
    }

    fn find_element<'a>(
        &'a self,
        kind: SelectorKind,
        selector: &str,
    ) -> Result<Box<dyn PageElement + 'a>, DriverError> {
        let found = match kind {
            SelectorKind::Css => self.tab.find_element(selector),
            SelectorKind::XPath => self.tab.find_element_by_xpath(selector),
        };
        match found {
            Ok(inner) => Ok(Box::new(ChromeElement { inner })),
            Err(e) => Err(classify_lookup_error(&e, kind, selector)),
        }
    }
}

struct ChromeElement<'a> {
    inner: Element<'a>,
}

const CLEAR_FN: &str = "function() { if (!('value' in this)) { return false; } this.value = ''; \
    this.dispatchEvent(new Event('input', { bubbles: true })); return true; }";

const DISPLAYED_FN: &str = "function() { const s = window.getComputedStyle(this); \
    return !!(this.offsetWidth || this.offsetHeight || this.getClientRects().length) \
    && s.visibility !== 'hidden' && s.display !== 'none'; }";

impl PageElement for ChromeElement<'_> {
    fn click(&self) -> Result<(), DriverError> {
        self.inner.click().map(|_| ()).map_err(|e| classify_click_error(&e))
    }

    fn clear(&self) -> Result<(), DriverError> {
        let result = self
            .inner
            .call_js_fn(CLEAR_FN, vec![], false)
            .map_err(other)?;
        match result.value.and_then(|v| v.as_bool()) {
            Some(true) => Ok(()),
            _ => Err(DriverError::Unsupported("element has no value to clear".into())),
        }
    }

    fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        self.inner
            .type_into(text)
            .map(|_| ())
            .map_err(|e| classify_click_error(&e))
    }

    fn set_files(&self, paths: &[String]) -> Result<(), DriverError> {
        self.inner
            .parent
            .call_method(DOM::SetFileInputFiles {
                files: paths.to_vec(),
                node_id: None,
                backend_node_id: None,
                object_id: Some(self.inner.remote_object_id.clone()),
            })
            .map(|_| ())
            .map_err(other)
    }

    fn is_displayed(&self) -> Result<bool, DriverError> {
        let result = self
            .inner
            .call_js_fn(DISPLAYED_FN, vec![], false)
            .map_err(other)?;
        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn run_script(&self, function: &str) -> Result<(), DriverError> {
        self.inner
            .call_js_fn(function, vec![], false)
            .map(|_| ())
            .map_err(other)
    }
}

fn other(e: anyhow::Error) -> DriverError {
    DriverError::Other(format!("{e:#}"))
}

/// Only an empty query result is `NotFound`; a bad selector or a lost
/// connection is a driver failure.
fn classify_lookup_error(e: &anyhow::Error, kind: SelectorKind, selector: &str) -> DriverError {
    let message = format!("{kind} '{selector}': {e:#}");
    let lower = message.to_lowercase();
    if lower.contains("no element found")
        || lower.contains("element not found")
        || lower.contains("couldn't find element")
        || lower.contains("could not find node")
        || lower.contains("no node")
    {
        DriverError::NotFound(message)
    } else {
        DriverError::Other(message)
    }
}

/// DevTools clicks fail either because something covers the target or
/// because it has no usable box (hidden, zero-sized, off-screen).
fn classify_click_error(e: &anyhow::Error) -> DriverError {
    let message = format!("{e:#}");
    let lower = message.to_lowercase();
    if lower.contains("intercept") || lower.contains("obscured") || lower.contains("covered") {
        DriverError::ClickIntercepted(message)
    } else if lower.contains("detached") || lower.contains("no node") {
        DriverError::NotFound(message)
    } else {
        DriverError::NotInteractable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_errors_are_classified() {
        let covered = anyhow::anyhow!("Click intercepted by another element");
        assert!(matches!(classify_click_error(&covered), DriverError::ClickIntercepted(_)));

        let hidden = anyhow::anyhow!("Could not compute box model.");
        assert!(matches!(classify_click_error(&hidden), DriverError::NotInteractable(_)));

        let gone = anyhow::anyhow!("Node is detached from document");
        assert!(matches!(classify_click_error(&gone), DriverError::NotFound(_)));
    }

    #[test]
    fn lookup_errors_separate_missing_from_broken() {
        let missing = anyhow::anyhow!("No element found");
        assert!(matches!(
            classify_lookup_error(&missing, SelectorKind::Css, "#resume"),
            DriverError::NotFound(_)
        ));

        let bad_xpath = anyhow::anyhow!("Method call error -32000: Invalid XPath expression");
        assert!(matches!(
            classify_lookup_error(&bad_xpath, SelectorKind::XPath, "//button[contains("),
            DriverError::Other(_)
        ));

        let closed = anyhow::anyhow!("Unable to make method calls because underlying connection is closed");
        assert!(matches!(
            classify_lookup_error(&closed, SelectorKind::Css, "#next"),
            DriverError::Other(_)
        ));
    }
}
