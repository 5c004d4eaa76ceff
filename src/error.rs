use thiserror::Error;

/// Failures reported by the browser capability surface.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("no element matches {0}")]
    NotFound(String),

    #[error("element not interactable: {0}")]
    NotInteractable(String),

    #[error("click intercepted: {0}")]
    ClickIntercepted(String),

    /// The element does not support the requested operation (e.g. clearing a button).
    #[error("operation unsupported: {0}")]
    Unsupported(String),

    #[error("driver failure: {0}")]
    Other(String),
}

/// Fatal outcomes of executing one action. Any of these aborts the batch.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("element not found for '{field}' (selector: {selector})")]
    ElementNotFound { field: String, selector: String },

    #[error("unresolved placeholder [{token}] in value for '{field}'")]
    UnresolvedPlaceholder { field: String, token: String },

    #[error("driver failure during '{field}': {source}")]
    Driver {
        field: String,
        #[source]
        source: DriverError,
    },
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("planner API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("planner returned no content")]
    EmptyReply,

    #[error("failed to parse planner reply: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("malformed selector '{0}'")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("playbook I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("playbook encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
