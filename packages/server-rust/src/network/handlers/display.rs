use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::network::extract::WorldEnv;
use crate::service::display::DisplayConfig;
use crate::service::operation::OperationResult;

/// Effective backend configuration, redacted for display.
pub async fn display_config_handler(
    State(state): State<AppState>,
    WorldEnv(env): WorldEnv,
) -> Json<OperationResult<DisplayConfig>> {
    Json(state.plane.display_config(&env).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::network::extract::WORLD_ENV_HEADER;
    use crate::network::handlers::test_support::{app, call};
    use crate::storage::memory::MemoryWorld;

    #[tokio::test]
    async fn default_backend_without_override() {
        let world = Arc::new(MemoryWorld::new());
        let (_, body) = call(app(&world), "GET", "/api/config", None).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["backend"], "memory");
    }

    #[tokio::test]
    async fn override_credentials_are_redacted() {
        let world = Arc::new(MemoryWorld::new());
        let header = r#"{"WORKFLOW_TARGET_WORLD":"postgres","WORKFLOW_CONNECTION_URL":"postgres://admin:hunter2@db:5432/runs","WORKFLOW_AUTH_TOKEN":"secret"}"#;
        let request = Request::builder()
            .uri("/api/config")
            .header(WORLD_ENV_HEADER, header)
            .body(Body::empty())
            .unwrap();

        let response = app(&world).oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("secret"));

        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["data"]["backend"], "postgres");
    }
}
