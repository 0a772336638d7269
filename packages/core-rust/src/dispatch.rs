//! Dispatch messages consumed by the workflow scheduling layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default prefix of per-workflow dispatch queues.
pub const WORKFLOW_QUEUE_PREFIX: &str = "__wkf_workflow_";

/// Queue that continues runs of `workflow_name`.
///
/// Derived only from the workflow name, so every caller addresses the same
/// queue for the same workflow.
#[must_use]
pub fn workflow_queue_name(prefix: &str, workflow_name: &str) -> String {
    format!("{prefix}{workflow_name}")
}

/// Payload placed on a workflow queue to continue a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub run_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

/// Identifier assigned by the queue to an enqueued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

/// Request to start a fresh run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRun {
    pub workflow_name: String,
    /// Serialized workflow arguments, passed through untouched.
    pub input: Value,
}
