//! Event endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use runboard_core::{ResolveData, SortOrder};
use serde::Deserialize;
use serde_json::Value;

use super::{AppState, ListQuery, ResolveQuery};
use crate::network::extract::WorldEnv;
use crate::service::operation::OperationResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationQuery {
    pub correlation_id: String,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub resolve_data: Option<ResolveData>,
}

pub async fn list_events_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Json<OperationResult<Value>> {
    Json(
        state
            .plane
            .list_events(&env, &run_id, &query.pagination(), query.resolve())
            .await,
    )
}

pub async fn list_events_by_correlation_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Query(query): Query<CorrelationQuery>,
) -> Json<OperationResult<Value>> {
    let list = ListQuery {
        limit: query.limit,
        cursor: query.cursor,
        sort_order: query.sort_order,
        resolve_data: query.resolve_data,
    };
    Json(
        state
            .plane
            .list_events_by_correlation_id(
                &env,
                &query.correlation_id,
                &list.pagination(),
                list.resolve(),
            )
            .await,
    )
}

pub async fn get_event_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path((run_id, event_id)): Path<(String, String)>,
    Query(query): Query<ResolveQuery>,
) -> Json<OperationResult<Value>> {
    Json(
        state
            .plane
            .get_event(&env, &run_id, &event_id, query.resolve())
            .await,
    )
}
