//! Operation context, failure taxonomy, and the tagged result envelope.

use std::time::Instant;

use runboard_core::StoreError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Context carried with every control-plane operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    /// Public name of the operation (e.g. `"wakeUpRun"`).
    pub operation: &'static str,
    /// Client-facing request parameters, echoed back in error records.
    pub params: Value,
    pub started_at: Instant,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, operation: &'static str, params: Value) -> Self {
        Self {
            call_id,
            operation,
            params,
            started_at: Instant::now(),
        }
    }
}

/// Failures that can end an operation before it produces a result.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to hydrate {resource}: {source}")]
    Hydration {
        resource: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("response is not serializable: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("unknown backend: {kind}")]
    UnknownBackend { kind: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Which side of the boundary a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLayer {
    Server,
    Store,
}

impl ErrorLayer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Store => "store",
        }
    }
}

/// Request details attached to an error record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub operation: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Client-safe description of a failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub layer: ErrorLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
}

impl ErrorRecord {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.request.as_ref().and_then(|r| r.status)
    }
}

/// Outcome of every exposed operation.
///
/// Serializes as `{"success": true, "data": ...}` or
/// `{"success": false, "error": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult<T> {
    Success(T),
    Failure(ErrorRecord),
}

impl<T> OperationResult<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Convert into a plain `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error record of a failed operation.
    pub fn into_result(self) -> Result<T, ErrorRecord> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure(err) => Err(err),
        }
    }
}

impl<T: Serialize> Serialize for OperationResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OperationResult", 2)?;
        match self {
            Self::Success(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            Self::Failure(error) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_wire_shape() {
        let result: OperationResult<Value> = OperationResult::Success(json!({ "stoppedCount": 1 }));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "success": true, "data": { "stoppedCount": 1 } })
        );
    }

    #[test]
    fn failure_wire_shape_omits_absent_fields() {
        let result: OperationResult<Value> = OperationResult::Failure(ErrorRecord {
            message: "boom".to_string(),
            layer: ErrorLayer::Server,
            cause: None,
            request: Some(RequestInfo {
                operation: "getRun".to_string(),
                params: json!({ "runId": "wrun_1" }),
                status: Some(500),
                url: None,
                code: None,
            }),
        });
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": false,
                "error": {
                    "message": "boom",
                    "layer": "server",
                    "request": {
                        "operation": "getRun",
                        "params": { "runId": "wrun_1" },
                        "status": 500
                    }
                }
            })
        );
    }

    #[test]
    fn exactly_one_variant_is_populated() {
        let ok: OperationResult<u32> = OperationResult::Success(3);
        assert_eq!(ok.data(), Some(&3));
        assert!(ok.error().is_none());

        let err: OperationResult<u32> = OperationResult::Failure(ErrorRecord {
            message: "x".to_string(),
            layer: ErrorLayer::Store,
            cause: None,
            request: None,
        });
        assert!(err.data().is_none());
        assert_eq!(err.into_result().unwrap_err().layer, ErrorLayer::Store);
    }

    #[test]
    fn store_error_converts_into_operation_error() {
        let err: OperationError = StoreError::status(401, "unauthorized").into();
        assert!(matches!(err, OperationError::Store(_)));
    }
}
