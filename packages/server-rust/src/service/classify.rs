//! Failure classification: converts an `OperationError` into a client-safe `ErrorRecord`.
//!
//! Decision table, first match wins:
//!
//! 1. Store-boundary failure carrying a status code -> layer `store`, message
//!    derived from the status.
//! 2. Dedicated not-found failure (`RunNotFound`, `HookNotFound`) -> layer
//!    `store`, status forced to 404.
//! 3. Anything else -> layer `server`, status 500, message prefixed with
//!    [`RESPONSE_ERROR_PREFIX`].
//!
//! Classification never fails.

use std::error::Error;
use std::sync::LazyLock;

use regex::Regex;
use runboard_core::StoreError;
use serde_json::Value;

use super::operation::{ErrorLayer, ErrorRecord, OperationError, RequestInfo};

pub const ACCESS_DENIED_MESSAGE: &str =
    "Access denied. Check your credentials and permissions for the workflow backend.";
pub const NOT_FOUND_MESSAGE: &str = "The requested resource was not found.";
pub const CONNECTIVITY_MESSAGE: &str =
    "Error connecting to the workflow backend. Please try again later.";
pub const NETWORK_MESSAGE: &str =
    "Network error while contacting the workflow backend. Check that it is reachable.";
pub const RESPONSE_ERROR_PREFIX: &str = "Error creating response";

static NETWORK_VOCABULARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)fetch failed|network|econnrefused|econnreset|enotfound|etimedout|socket hang up")
        .expect("network vocabulary regex")
});

/// Classify `failure` raised by `operation` called with `params`.
#[must_use]
pub fn classify(failure: &OperationError, operation: &str, params: &Value) -> ErrorRecord {
    match failure {
        OperationError::Store(StoreError::Boundary {
            status: Some(status),
            message,
            url,
            code,
            trace,
        }) => ErrorRecord {
            message: boundary_message(*status, message),
            layer: ErrorLayer::Store,
            cause: Some(trace.clone().unwrap_or_else(|| message.clone())),
            request: Some(RequestInfo {
                operation: operation.to_string(),
                params: params.clone(),
                status: Some(*status),
                url: url.clone(),
                code: code.clone(),
            }),
        },
        OperationError::Store(
            err @ (StoreError::RunNotFound { .. } | StoreError::HookNotFound { .. }),
        ) => ErrorRecord {
            message: NOT_FOUND_MESSAGE.to_string(),
            layer: ErrorLayer::Store,
            cause: Some(err.to_string()),
            request: Some(RequestInfo {
                operation: operation.to_string(),
                params: params.clone(),
                status: Some(404),
                url: None,
                code: None,
            }),
        },
        OperationError::InvalidBody(err) => ErrorRecord {
            message: failure.to_string(),
            layer: ErrorLayer::Server,
            cause: Some(err.to_string()),
            request: Some(RequestInfo {
                operation: operation.to_string(),
                params: params.clone(),
                status: Some(400),
                url: None,
                code: None,
            }),
        },
        other => ErrorRecord {
            message: format!("{RESPONSE_ERROR_PREFIX}: {other}"),
            layer: ErrorLayer::Server,
            cause: Some(diagnostic(other)),
            request: Some(RequestInfo {
                operation: operation.to_string(),
                params: params.clone(),
                status: Some(500),
                url: None,
                code: None,
            }),
        },
    }
}

/// User-visible message for a boundary failure with `status`.
///
/// Auth, not-found and server errors get generic text so backend internals
/// are not leaked; other statuses pass the original message through.
fn boundary_message(status: u16, original: &str) -> String {
    match status {
        401 | 403 => ACCESS_DENIED_MESSAGE.to_string(),
        404 => NOT_FOUND_MESSAGE.to_string(),
        500 => CONNECTIVITY_MESSAGE.to_string(),
        _ if NETWORK_VOCABULARY.is_match(original) => NETWORK_MESSAGE.to_string(),
        _ => original.to_string(),
    }
}

/// Best available diagnostic text: a backend trace when present, otherwise
/// the full source chain.
fn diagnostic(failure: &OperationError) -> String {
    if let OperationError::Store(StoreError::Boundary {
        trace: Some(trace), ..
    }) = failure
    {
        return trace.clone();
    }
    if let OperationError::Internal(err) = failure {
        return format!("{err:#}");
    }

    let mut text = failure.to_string();
    let mut source = failure.source();
    while let Some(err) = source {
        let next = err.to_string();
        if !text.ends_with(&next) {
            text.push_str(": ");
            text.push_str(&next);
        }
        source = err.source();
    }
    text
}
