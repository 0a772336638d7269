//! HTTP handlers for the control-plane API.
//!
//! Every `/api` handler answers 200 with an `OperationResult` envelope; the
//! envelope, not the status code, says whether the operation succeeded.
//! Stream reads are the exception and answer with the record's own status.

pub mod display;
pub mod events;
pub mod health;
pub mod hooks;
pub mod runs;
pub mod steps;
pub mod streams;

pub use display::display_config_handler;
pub use events::{get_event_handler, list_events_by_correlation_handler, list_events_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use hooks::{get_hook_handler, list_hooks_handler, resume_hook_handler};
pub use runs::{
    cancel_run_handler, get_run_handler, list_runs_handler, recreate_run_handler,
    reenqueue_run_handler, wake_up_run_handler,
};
pub use steps::{get_step_handler, list_steps_handler};
pub use streams::{list_streams_handler, read_stream_handler};

use std::sync::Arc;
use std::time::Instant;

use runboard_core::{Pagination, ResolveData, SortOrder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::ShutdownController;
use crate::service::classify::classify;
use crate::service::operation::{ErrorRecord, OperationError};
use crate::service::ControlPlane;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub plane: Arc<ControlPlane>,
    pub shutdown: Arc<ShutdownController>,
    /// Process start, for uptime.
    pub start_time: Instant,
}

/// Pagination and payload options accepted by list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub resolve_data: Option<ResolveData>,
}

impl ListQuery {
    #[must_use]
    pub fn pagination(&self) -> Pagination {
        Pagination {
            limit: self.limit,
            cursor: self.cursor.clone(),
            sort_order: self.sort_order.unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn resolve(&self) -> ResolveData {
        self.resolve_data.unwrap_or_default()
    }
}

/// Payload option accepted by single-resource endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveQuery {
    pub resolve_data: Option<ResolveData>,
}

impl ResolveQuery {
    #[must_use]
    pub fn resolve(self) -> ResolveData {
        self.resolve_data.unwrap_or_default()
    }
}

/// Decode the JSON body of `operation`.
///
/// A malformed body becomes a server-layer record with status 400, so it
/// reaches the client in the same envelope as any other failure.
pub(crate) fn parse_body<T: DeserializeOwned>(
    operation: &'static str,
    params: &Value,
    body: &[u8],
) -> Result<T, ErrorRecord> {
    serde_json::from_slice(body)
        .map_err(|err| classify(&OperationError::InvalidBody(err), operation, params))
}
