//! Sandbox process supervision: one executor per process, pooled for reuse.

pub mod executor;
pub mod pool;
mod protocol;

pub use executor::{InboundLlmHandler, SandboxConfig, SandboxExecutor};
pub use pool::ContainerPool;
