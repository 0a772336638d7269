//! Runboard HTTP server.
//!
//! Process-wide backend settings come from `WORKFLOW_*` environment variables
//! (or the matching flags). When any is set, per-request overrides sent by
//! the dashboard are ignored.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use runboard_server::network::{NetworkConfig, NetworkModule};
use runboard_server::service::config::{
    AUTH_TOKEN, CONNECTION_URL, DATA_DIR, ENVIRONMENT, PROJECT, TARGET_WORLD,
};
use runboard_server::service::{AmbientConfig, ControlPlane, ControlPlaneConfig, Settings};
use runboard_server::storage::{BackendRegistry, MemoryWorldFactory};
use runboard_server::telemetry::init_tracing;

#[derive(Debug, Parser)]
#[command(name = "runboard", version, about = "Run control plane for the workflow dashboard")]
struct Args {
    #[arg(long, env = "RUNBOARD_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "RUNBOARD_PORT", default_value_t = 3456)]
    port: u16,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RUNBOARD_LOG_JSON")]
    log_json: bool,

    /// Allowed CORS origins, comma separated. `*` allows any.
    #[arg(long, env = "RUNBOARD_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Seconds a request may run before it is answered with 408.
    #[arg(long, env = "RUNBOARD_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Backend used when no setting names one.
    #[arg(long, env = "RUNBOARD_DEFAULT_BACKEND", default_value = "memory")]
    default_backend: String,

    /// Maximum number of events inspected when waking a run.
    #[arg(long, env = "RUNBOARD_EVENT_SCAN_LIMIT", default_value_t = 1000)]
    event_scan_limit: usize,

    #[arg(long, env = TARGET_WORLD)]
    target_world: Option<String>,

    #[arg(long, env = CONNECTION_URL, hide_env_values = true)]
    connection_url: Option<String>,

    #[arg(long, env = AUTH_TOKEN, hide_env_values = true)]
    auth_token: Option<String>,

    #[arg(long, env = DATA_DIR)]
    data_dir: Option<String>,

    #[arg(long, env = PROJECT)]
    project: Option<String>,

    #[arg(long, env = ENVIRONMENT)]
    environment: Option<String>,
}

impl Args {
    fn process_settings(&self) -> Settings {
        let mut settings = Settings::new();
        for (key, value) in [
            (TARGET_WORLD, &self.target_world),
            (CONNECTION_URL, &self.connection_url),
            (AUTH_TOKEN, &self.auth_token),
            (DATA_DIR, &self.data_dir),
            (PROJECT, &self.project),
            (ENVIRONMENT, &self.environment),
        ] {
            if let Some(value) = value {
                settings.set(key, value.as_str());
            }
        }
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let ambient = Arc::new(AmbientConfig::new(args.process_settings()));
    if !ambient.is_empty() {
        info!("process-wide backend settings present; request overrides are ignored");
    }

    let mut registry = BackendRegistry::new();
    registry.register(MemoryWorldFactory::new());
    info!(backends = ?registry.kinds(), "backends registered");

    let plane = ControlPlane::new(
        registry,
        ambient,
        ControlPlaneConfig {
            event_scan_limit: args.event_scan_limit,
            default_backend: args.default_backend.clone(),
            ..ControlPlaneConfig::default()
        },
    );

    let config = NetworkConfig {
        host: args.host.clone(),
        port: args.port,
        cors_origins: args.cors_origins.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        ..NetworkConfig::default()
    };
    let mut module = NetworkModule::new(config, Arc::new(plane));
    let port = module.start().await?;
    info!(port, "runboard listening");

    module
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await
}
