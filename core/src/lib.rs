pub mod config;
pub mod error;
pub mod kernel;
pub mod magic;
pub mod orchestrator;
pub mod output;
pub mod services;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{KernelConfig, StrategyKind};
pub use error::{KernelError, Result};
pub use kernel::{Completion, CompletionStatus, Kernel};
pub use output::{DisplaySurface, RenderEvent, StreamName};
pub use types::{InvocationId, SessionId};
