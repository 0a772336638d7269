//! Execution-store backends and the registry that constructs them by kind.

pub mod factory;
pub mod memory;

pub use factory::{BackendRegistry, WorldFactory};
pub use memory::{MemoryWorld, MemoryWorldFactory};
