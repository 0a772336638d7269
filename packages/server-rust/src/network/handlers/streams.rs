//! Stream endpoints.
//!
//! Stream contents are sent as newline-delimited JSON, one chunk per line.
//! A chunk that fails to decode ends the body with an `{"error": ...}` line.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::network::extract::WorldEnv;
use crate::service::operation::OperationResult;

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub start_index: Option<usize>,
}

pub async fn list_streams_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(run_id): Path<String>,
) -> Json<OperationResult<Vec<String>>> {
    Json(state.plane.list_streams(&env, &run_id).await)
}

pub async fn read_stream_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
    Path(stream_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let chunks = match state
        .plane
        .read_stream(&env, &stream_id, query.start_index.unwrap_or(0))
        .await
    {
        Ok(chunks) => chunks,
        Err(record) => {
            let status = record
                .status()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(record)).into_response();
        }
    };

    // Stop after the first error line.
    let lines = chunks
        .scan(false, |failed, chunk| {
            if *failed {
                return futures_util::future::ready(None);
            }
            let line = match chunk {
                Ok(value) => value,
                Err(record) => {
                    *failed = true;
                    json!({ "error": record })
                }
            };
            futures_util::future::ready(Some(line))
        })
        .map(|line: Value| Ok::<_, Infallible>(Bytes::from(format!("{line}\n"))));

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use crate::network::handlers::test_support::{app, call};
    use crate::storage::memory::MemoryWorld;

    fn chunk(value: &serde_json::Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    #[tokio::test]
    async fn streams_listed_per_run() {
        let world = Arc::new(MemoryWorld::new());
        let run = world.create_run("render", "dpl_1", json!([]));
        world.write_stream(&run.run_id, "strm_a", vec![chunk(&json!(1))]);
        world.write_stream(&run.run_id, "strm_b", vec![]);

        let uri = format!("/api/runs/{}/streams", run.run_id);
        let (_, body) = call(app(&world), "GET", &uri, None).await;
        let mut ids: Vec<String> = serde_json::from_value(body["data"].clone()).unwrap();
        ids.sort();
        assert_eq!(ids, vec!["strm_a", "strm_b"]);
    }

    #[tokio::test]
    async fn stream_chunks_are_ndjson_from_start_index() {
        let world = Arc::new(MemoryWorld::new());
        let run = world.create_run("render", "dpl_1", json!([]));
        world.write_stream(
            &run.run_id,
            "strm_a",
            vec![
                chunk(&json!({ "n": 0 })),
                chunk(&json!({ "n": 1 })),
                chunk(&json!({ "n": 2 })),
            ],
        );

        let (status, body) =
            call(app(&world), "GET", "/api/streams/strm_a?startIndex=1", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = body.as_str().unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    }

    #[tokio::test]
    async fn undecodable_chunk_ends_with_error_line() {
        let world = Arc::new(MemoryWorld::new());
        let run = world.create_run("render", "dpl_1", json!([]));
        world.write_stream(
            &run.run_id,
            "strm_bad",
            vec![
                chunk(&json!("ok")),
                b"not json".to_vec(),
                chunk(&json!("never sent")),
            ],
        );

        let (_, body) = call(app(&world), "GET", "/api/streams/strm_bad", None).await;
        let text = body.as_str().unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], json!("ok"));
        assert_eq!(lines[1]["error"]["layer"], "server");
    }

    #[tokio::test]
    async fn missing_stream_answers_with_record_status() {
        let world = Arc::new(MemoryWorld::new());
        let (status, body) = call(app(&world), "GET", "/api/streams/strm_none", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["layer"], "store");
        assert_eq!(body["request"]["operation"], "readStream");
    }
}
