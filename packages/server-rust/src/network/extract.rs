//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::service::config::Settings;

/// Header carrying the caller's backend settings as a JSON object.
pub const WORLD_ENV_HEADER: &str = "x-world-env";

/// The caller override sent with a request. An absent header is an empty
/// mapping.
#[derive(Debug, Clone, Default)]
pub struct WorldEnv(pub Settings);

/// Rejection for a malformed `x-world-env` header.
#[derive(Debug)]
pub struct WorldEnvRejection(String);

impl IntoResponse for WorldEnvRejection {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": { "message": self.0, "layer": "server" },
        });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for WorldEnv {
    type Rejection = WorldEnvRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(WORLD_ENV_HEADER) else {
            return Ok(Self::default());
        };
        let text = raw
            .to_str()
            .map_err(|_| WorldEnvRejection(format!("{WORLD_ENV_HEADER} is not valid UTF-8")))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str::<Settings>(text)
            .map(Self)
            .map_err(|e| {
                WorldEnvRejection(format!("{WORLD_ENV_HEADER} must be a JSON object of strings: {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::service::config::{CONNECTION_URL, PROJECT};

    async fn extract(header: Option<&str>) -> Result<WorldEnv, WorldEnvRejection> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(WORLD_ENV_HEADER, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        WorldEnv::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn absent_header_is_empty() {
        assert!(extract(None).await.unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn object_header_is_parsed_and_empty_values_dropped() {
        let header = format!(r#"{{"{CONNECTION_URL}":"memory://a","{PROJECT}":""}}"#);
        let env = extract(Some(&header)).await.unwrap().0;
        assert_eq!(env.get(CONNECTION_URL), Some("memory://a"));
        assert_eq!(env.get(PROJECT), None);
        assert_eq!(env.len(), 1);
    }

    #[tokio::test]
    async fn malformed_header_is_rejected() {
        let rejection = extract(Some("[1,2]")).await.unwrap_err();
        let response = rejection.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
