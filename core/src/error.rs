//! Structured error types for the kernel client
//!
//! Only failures that end a submission are errors here. Compile
//! diagnostics, unknown directives, unrenderable outputs and interrupts
//! are ordinary outcomes and never reach this type.

use thiserror::Error;

/// Which remote collaborator a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Compiler,
    Registry,
    Driver,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Compiler => write!(f, "compiler"),
            Service::Registry => write!(f, "registry"),
            Service::Driver => write!(f, "driver"),
        }
    }
}

/// Primary error type for kernel operations
#[derive(Error, Debug)]
pub enum KernelError {
    // =========================================================================
    // Service / Transport Errors
    // =========================================================================
    /// Service unreachable, connection dropped or non-success reply
    #[error("{service} unavailable: {message}")]
    Transport { service: Service, message: String },

    /// Service answered with something we could not decode
    #[error("malformed {service} response: {message}")]
    MalformedResponse { service: Service, message: String },

    // =========================================================================
    // Directive Errors
    // =========================================================================
    /// A recognized directive with unusable arguments
    #[error("malformed directive '{directive}': {reason}")]
    MalformedDirective { directive: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("invalid configuration: {0}")]
    Config(String),

    // =========================================================================
    // External Error Wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KernelError {
    pub fn transport(service: Service, message: impl Into<String>) -> Self {
        Self::Transport {
            service,
            message: message.into(),
        }
    }

    pub fn malformed(service: Service, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service,
            message: message.into(),
        }
    }

    pub fn directive(directive: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDirective {
            directive: directive.into(),
            reason: reason.into(),
        }
    }

    /// Worth another attempt at the next poll.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
            ),
            Self::MalformedResponse { .. }
            | Self::MalformedDirective { .. }
            | Self::Config(_)
            | Self::Json(_) => false,
        }
    }

    /// Text shown in the cell when a submission fails.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { service, .. } => {
                format!("Could not reach the {} service: {}", service, self)
            }
            Self::MalformedDirective { directive, reason } => {
                format!("Directive '{}' failed: {}", directive, reason)
            }
            _ => self.to_string(),
        }
    }

    pub(crate) fn from_reqwest(service: Service, err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::malformed(service, err.to_string())
        } else {
            Self::transport(service, err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;
