//! The run control plane.
//!
//! 1. **Configuration** (`config`): caller overrides vs process-wide settings
//! 2. **Instance cache** (`instance_cache`): one store connection per configuration
//! 3. **Operations** (`control_plane`): every dashboard operation, enveloped
//! 4. **Envelope** (`envelope`, `classify`): success normalization and failure records
//! 5. **Reconciliation** (`reconcile`, `hooks`): waking runs and resuming hooks

pub mod classify;
pub mod config;
pub mod control_plane;
pub mod display;
pub mod envelope;
pub mod hooks;
pub mod instance_cache;
pub mod operation;
pub mod reconcile;

pub use config::{AmbientConfig, ConfigResolver, ControlPlaneConfig, Settings};
pub use control_plane::{ControlPlane, ValueStream};
pub use display::DisplayConfig;
pub use instance_cache::{ConnectionHandle, InstanceCache};
pub use operation::{ErrorLayer, ErrorRecord, OperationError, OperationResult};
pub use reconcile::WakeUpSummary;
