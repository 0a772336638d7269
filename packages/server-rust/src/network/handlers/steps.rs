//! Step endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;

use super::{AppState, ListQuery, ResolveQuery};
use crate::network::extract::WorldEnv;
use crate::service::operation::OperationResult;

pub async fn list_steps_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Json<OperationResult<Value>> {
    Json(
        state
            .plane
            .list_steps(&env, &run_id, &query.pagination(), query.resolve())
            .await,
    )
}

pub async fn get_step_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path((run_id, step_id)): Path<(String, String)>,
    Query(query): Query<ResolveQuery>,
) -> Json<OperationResult<Value>> {
    Json(
        state
            .plane
            .get_step(&env, &run_id, &step_id, query.resolve())
            .await,
    )
}
