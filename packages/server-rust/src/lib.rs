//! Runboard server: the run control plane behind a workflow dashboard.
//!
//! Resolves which execution store a call talks to, caches one connection per
//! configuration, and exposes run, step, event, hook and stream operations
//! over an axum API with a uniform success/failure envelope.

pub mod network;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use network::{build_router, NetworkConfig, NetworkModule};
pub use service::{ControlPlane, ControlPlaneConfig, OperationResult};
