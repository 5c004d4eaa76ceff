pub mod action;
pub mod brain;
pub mod capture;
pub mod config;
pub mod dom;
pub mod error;
pub mod executor;
pub mod face;
pub mod hands;
pub mod judge;
pub mod playbook;
pub mod sanitize;
pub mod session;
pub mod types;
pub mod wait;

#[cfg(test)]
mod fake;

pub use action::{Action, ActionKey, ActionKind, Playbook, SelectorKind};
pub use brain::{OpenAiPlanner, Planner};
pub use config::{Args, SessionConfig};
pub use executor::{Executor, ProfileValues};
pub use hands::{Browser, ChromeBrowser, ChromeOptions};
pub use playbook::{JsonPlaybookStore, MemoryPlaybookStore, PlaybookStore};
pub use session::{SessionController, SessionReport, SessionStatus};
pub use types::{FormSection, PageSnapshot};
