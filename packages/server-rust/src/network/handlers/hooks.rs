//! Hook endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use bytes::Bytes;
use runboard_core::{HookFilter, HookResumption, ResolveData, SortOrder};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_body, AppState, ListQuery, ResolveQuery};
use crate::network::extract::WorldEnv;
use crate::service::operation::OperationResult;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookListQuery {
    pub run_id: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub resolve_data: Option<ResolveData>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeHookBody {
    pub token: String,
    #[serde(default)]
    pub payload: Value,
}

pub async fn list_hooks_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Query(query): Query<HookListQuery>,
) -> Json<OperationResult<Value>> {
    let filter = HookFilter {
        run_id: query.run_id,
    };
    let list = ListQuery {
        limit: query.limit,
        cursor: query.cursor,
        sort_order: query.sort_order,
        resolve_data: query.resolve_data,
    };
    Json(
        state
            .plane
            .list_hooks(&env, &filter, &list.pagination(), list.resolve())
            .await,
    )
}

pub async fn get_hook_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(hook_id): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Json<OperationResult<Value>> {
    Json(state.plane.get_hook(&env, &hook_id, query.resolve()).await)
}

pub async fn resume_hook_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    body: Bytes,
) -> Json<OperationResult<HookResumption>> {
    // Params stay empty: the body carries the token.
    let body: ResumeHookBody = match parse_body("resumeHook", &json!({}), &body) {
        Ok(parsed) => parsed,
        Err(record) => return Json(OperationResult::Failure(record)),
    };
    Json(
        state
            .plane
            .resume_hook(&env, &body.token, body.payload)
            .await,
    )
}
