//! HTTP surface: configuration, extractors, handlers, middleware, and the
//! server lifecycle with graceful shutdown.

pub mod config;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use extract::{WorldEnv, WORLD_ENV_HEADER};
pub use handlers::AppState;
pub use module::{build_router, NetworkModule};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
