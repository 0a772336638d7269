//! Wake-up reconciliation for suspended runs.
//!
//! A run sleeping on a wait has a `wait_created` event with no matching
//! `wait_completed` event (matched by correlation id). Waking the run appends
//! the missing completions and re-dispatches the run once.

use std::collections::HashSet;

use futures_util::future::try_join_all;
use runboard_core::{
    workflow_queue_name, DispatchOptions, Event, EventType, NewEvent, Pagination, QueueMessage,
    ResolveData, SortOrder, StoreError, World,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Outcome of a wake-up call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeUpSummary {
    /// Number of pending waits that were interrupted.
    pub stopped_count: usize,
}

/// `wait_created` events in `events` that have no `wait_completed`
/// counterpart, restricted to `targets` when it is non-empty.
///
/// A wait without a correlation id can never be matched and is always pending.
#[must_use]
pub fn pending_waits<'a>(events: &'a [Event], targets: Option<&[String]>) -> Vec<&'a Event> {
    let completed: HashSet<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::WaitCompleted)
        .filter_map(|e| e.correlation_id.as_deref())
        .collect();
    let targets: Option<HashSet<&str>> = targets
        .filter(|t| !t.is_empty())
        .map(|t| t.iter().map(String::as_str).collect());

    events
        .iter()
        .filter(|e| e.event_type == EventType::WaitCreated)
        .filter(|e| {
            e.correlation_id
                .as_deref()
                .is_none_or(|cid| !completed.contains(cid))
        })
        .filter(|e| match (&targets, e.correlation_id.as_deref()) {
            (None, _) => true,
            (Some(targets), Some(cid)) => targets.contains(cid),
            (Some(_), None) => false,
        })
        .collect()
}

/// Interrupt the pending waits of `run_id` and re-dispatch it.
///
/// Every synthesized completion is accepted by the store before the run is
/// enqueued. Nothing is written or dispatched when no wait is pending.
///
/// # Errors
///
/// Propagates store failures, including `RunNotFound` for a missing run.
pub async fn wake_up(
    world: &dyn World,
    run_id: &str,
    targets: Option<&[String]>,
    event_scan_limit: usize,
    queue_prefix: &str,
) -> Result<WakeUpSummary, StoreError> {
    let run = world.runs().get(run_id, ResolveData::None).await?;

    let page = Pagination {
        limit: Some(event_scan_limit),
        cursor: None,
        sort_order: SortOrder::Asc,
    };
    let events = world
        .events()
        .list(run_id, &page, ResolveData::None)
        .await?
        .data;

    let pending = pending_waits(&events, targets);
    if pending.is_empty() {
        debug!(run_id, "no pending waits");
        return Ok(WakeUpSummary { stopped_count: 0 });
    }

    let completions = pending
        .iter()
        .filter_map(|e| e.correlation_id.as_deref())
        .filter(|cid| !cid.is_empty())
        .map(|cid| world.events().create(run_id, NewEvent::wait_completed(cid)));
    try_join_all(completions).await?;

    let queue = workflow_queue_name(queue_prefix, &run.workflow_name);
    world
        .dispatch()
        .enqueue(
            &queue,
            QueueMessage {
                run_id: run.run_id.clone(),
            },
            &DispatchOptions {
                deployment_id: Some(run.deployment_id.clone()),
            },
        )
        .await?;

    info!(run_id, stopped = pending.len(), queue = %queue, "run woken up");
    Ok(WakeUpSummary {
        stopped_count: pending.len(),
    })
}
