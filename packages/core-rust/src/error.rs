//! Failures raised at the execution-store boundary.
//!
//! Backends report every failure through [`StoreError`]. The set is closed so
//! the control plane can classify failures by variant instead of probing
//! ad hoc properties.

/// Error raised by an execution-store capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store answered with an HTTP-like failure (or no status at all when
    /// the failure happened before a response was produced).
    #[error("{message}")]
    Boundary {
        status: Option<u16>,
        message: String,
        url: Option<String>,
        code: Option<String>,
        /// Backend-provided diagnostic trace, if any.
        trace: Option<String>,
    },
    /// The requested run does not exist.
    #[error("workflow run not found: {run_id}")]
    RunNotFound { run_id: String },
    /// No hook is registered for the given token.
    #[error("hook not found for token")]
    HookNotFound { token: String },
    /// The store could not be reached (connection refused, fetch failed).
    #[error("{0}")]
    Unavailable(String),
}

impl StoreError {
    /// Boundary failure with a status code and message.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Boundary {
            status: Some(status),
            message: message.into(),
            url: None,
            code: None,
            trace: None,
        }
    }

    /// 404 boundary failure naming the missing resource.
    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::status(404, format!("{resource} not found: {id}"))
    }

    /// HTTP-like status carried by this failure, if any.
    ///
    /// `RunNotFound` and `HookNotFound` normalize to 404.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Boundary { status, .. } => *status,
            Self::RunNotFound { .. } | Self::HookNotFound { .. } => Some(404),
            Self::Unavailable(_) => None,
        }
    }
}
