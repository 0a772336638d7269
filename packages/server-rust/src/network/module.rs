//! HTTP server lifecycle with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener and
//! `serve()` accepts requests until the shutdown future resolves. Binding
//! before serving lets the caller learn the OS-assigned port first.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    cancel_run_handler, display_config_handler, get_event_handler, get_hook_handler,
    get_run_handler, get_step_handler, health_handler, list_events_by_correlation_handler,
    list_events_handler, list_hooks_handler, list_runs_handler, list_steps_handler,
    list_streams_handler, liveness_handler, read_stream_handler, readiness_handler,
    recreate_run_handler, reenqueue_run_handler, resume_hook_handler, wake_up_run_handler,
    AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::{track_in_flight, ShutdownController};
use crate::service::ControlPlane;

/// Assemble the full router.
///
/// Probes live under `/health` and are never refused. Everything under
/// `/api` is tracked for draining and refused with 503 once shutdown starts.
pub fn build_router(
    plane: Arc<ControlPlane>,
    shutdown: Arc<ShutdownController>,
    config: &NetworkConfig,
) -> Router {
    let state = AppState {
        plane,
        shutdown: Arc::clone(&shutdown),
        start_time: Instant::now(),
    };

    let api = Router::new()
        .route("/config", get(display_config_handler))
        .route("/runs", get(list_runs_handler))
        .route("/runs/{run_id}", get(get_run_handler))
        .route("/runs/{run_id}/cancel", post(cancel_run_handler))
        .route("/runs/{run_id}/recreate", post(recreate_run_handler))
        .route("/runs/{run_id}/reenqueue", post(reenqueue_run_handler))
        .route("/runs/{run_id}/wake-up", post(wake_up_run_handler))
        .route("/runs/{run_id}/steps", get(list_steps_handler))
        .route("/runs/{run_id}/steps/{step_id}", get(get_step_handler))
        .route("/runs/{run_id}/events", get(list_events_handler))
        .route("/runs/{run_id}/events/{event_id}", get(get_event_handler))
        .route("/runs/{run_id}/streams", get(list_streams_handler))
        .route("/events", get(list_events_by_correlation_handler))
        .route("/hooks", get(list_hooks_handler))
        .route("/hooks/resume", post(resume_hook_handler))
        .route("/hooks/{hook_id}", get(get_hook_handler))
        .route("/streams/{stream_id}", get(read_stream_handler))
        .layer(axum::middleware::from_fn_with_state(shutdown, track_in_flight));

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .nest("/api", api)
        .layer(build_http_layers(config))
        .with_state(state)
}

/// Owns the listener and the pieces the router is built from.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    plane: Arc<ControlPlane>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Create the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, plane: Arc<ControlPlane>) -> Self {
        Self {
            config,
            listener: None,
            plane,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Bind the listener and return the bound port, which differs from the
    /// configured one when port 0 asks for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests for up
    /// to the configured drain timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = build_router(self.plane, Arc::clone(&self.shutdown), &self.config);

        self.shutdown.set_ready();
        info!("serving HTTP");

        let controller = Arc::clone(&self.shutdown);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                controller.trigger_shutdown();
            })
            .await?;

        self.shutdown.trigger_shutdown();
        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::HealthState;
    use crate::service::config::{AmbientConfig, ControlPlaneConfig};
    use crate::storage::factory::BackendRegistry;
    use crate::storage::memory::MemoryWorldFactory;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn plane() -> Arc<ControlPlane> {
        let mut registry = BackendRegistry::new();
        registry.register(MemoryWorldFactory::new());
        Arc::new(ControlPlane::new(
            registry,
            Arc::new(AmbientConfig::default()),
            ControlPlaneConfig::default(),
        ))
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn new_does_not_bind() {
        let module = NetworkModule::new(NetworkConfig::default(), plane());
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let mut module = NetworkModule::new(NetworkConfig::default(), plane());
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = NetworkModule::new(NetworkConfig::default(), plane());
        let err = module.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let mut module = NetworkModule::new(NetworkConfig::default(), plane());
        module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(module.serve(async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn health_checks_stay_up_while_api_is_refused() {
        let shutdown = Arc::new(ShutdownController::new());
        shutdown.set_ready();
        let router = build_router(plane(), Arc::clone(&shutdown), &NetworkConfig::default());

        let response = router.clone().oneshot(request("/api/config")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        shutdown.trigger_shutdown();
        let response = router.clone().oneshot(request("/api/config")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = router.clone().oneshot(request("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router.oneshot(request("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let shutdown = Arc::new(ShutdownController::new());
        let router = build_router(plane(), shutdown, &NetworkConfig::default());
        let response = router.oneshot(request("/api/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
