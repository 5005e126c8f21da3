//! Error types for the RVM domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all RVM operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Hardware errors ---
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    // --- Event feed errors ---
    #[error("Event feed error: {0}")]
    Feed(#[from] FeedError),

    // --- Session policy errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Operator command errors ---
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failure of a single request/response call against the local hardware API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    /// No module identity has been assigned yet; only the identity request
    /// itself may be issued.
    #[error("Device not provisioned: no module id assigned yet")]
    NotProvisioned,

    #[error("Hardware request {action} failed: {reason}")]
    Request { action: String, reason: String },

    #[error("Hardware request {action} timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("Hardware rejected {action} (status: {status_code})")]
    Rejected { action: String, status_code: u16 },

    #[error("Hardware transport error: {0}")]
    Transport(String),
}

impl HardwareError {
    /// Whether this failure is the provisioning gate rather than a transient fault.
    pub fn is_provisioning(&self) -> bool {
        matches!(self, HardwareError::NotProvisioned)
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Event feed connection failed: {0}")]
    ConnectFailed(String),

    #[error("Event feed connection lost: {0}")]
    ConnectionLost(String),

    #[error("Malformed feed message: {0}")]
    Malformed(String),
}

/// Policy violations: a command that needs an active session when there is
/// none, or vice versa. These are always reported as warnings, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("System is not ready to accept a session")]
    NotReady,

    #[error("A teardown is already in progress")]
    TeardownInProgress,

    #[error("No active session")]
    NoActiveSession,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Invalid command parameters: {0}")]
    InvalidParams(String),

    #[error("Controller is not running")]
    ControllerGone,
}
