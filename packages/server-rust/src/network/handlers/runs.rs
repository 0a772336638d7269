//! Run endpoints: listing, inspection and control actions.

use axum::extract::{Path, Query, State};
use axum::Json;
use bytes::Bytes;
use runboard_core::{RunFilter, RunStatus, WorkflowRun};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_body, AppState, ListQuery, ResolveQuery};
use crate::network::extract::WorldEnv;
use crate::service::operation::OperationResult;
use crate::service::reconcile::WakeUpSummary;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListQuery {
    pub workflow_name: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort_order: Option<runboard_core::SortOrder>,
    pub resolve_data: Option<runboard_core::ResolveData>,
}

impl RunListQuery {
    fn split(self) -> (RunFilter, ListQuery) {
        (
            RunFilter {
                workflow_name: self.workflow_name,
                status: self.status,
            },
            ListQuery {
                limit: self.limit,
                cursor: self.cursor,
                sort_order: self.sort_order,
                resolve_data: self.resolve_data,
            },
        )
    }
}

/// Body of `POST /api/runs/{run_id}/wake-up`. An empty body wakes every
/// pending wait.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeUpBody {
    pub correlation_ids: Option<Vec<String>>,
}

pub async fn list_runs_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Query(query): Query<RunListQuery>,
) -> Json<OperationResult<Value>> {
    let (filter, list) = query.split();
    Json(
        state
            .plane
            .list_runs(&env, &filter, &list.pagination(), list.resolve())
            .await,
    )
}

pub async fn get_run_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Json<OperationResult<Value>> {
    Json(state.plane.get_run(&env, &run_id, query.resolve()).await)
}

pub async fn cancel_run_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
) -> Json<OperationResult<WorkflowRun>> {
    Json(state.plane.cancel_run(&env, &run_id).await)
}

pub async fn recreate_run_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
) -> Json<OperationResult<Value>> {
    let result = match state.plane.recreate_run(&env, &run_id).await {
        OperationResult::Success(new_run_id) => {
            OperationResult::Success(json!({ "runId": new_run_id }))
        }
        OperationResult::Failure(record) => OperationResult::Failure(record),
    };
    Json(result)
}

pub async fn reenqueue_run_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
) -> Json<OperationResult<()>> {
    Json(state.plane.reenqueue_run(&env, &run_id).await)
}

pub async fn wake_up_run_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Json<OperationResult<WakeUpSummary>> {
    let body: WakeUpBody = if body.iter().all(u8::is_ascii_whitespace) {
        WakeUpBody::default()
    } else {
        match parse_body("wakeUpRun", &json!({ "runId": run_id }), &body) {
            Ok(parsed) => parsed,
            Err(record) => return Json(OperationResult::Failure(record)),
        }
    };
    Json(
        state
            .plane
            .wake_up_run(&env, &run_id, body.correlation_ids.as_deref())
            .await,
    )
}
