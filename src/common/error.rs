//! Error types for the debugger core
//!
//! Errors are grouped by the channel they come from so a frontend can tell a
//! recoverable control failure apart from a fatal protocol violation.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger core
#[derive(Error, Debug)]
pub enum Error {
    // === Control Channel Errors ===
    #[error("Control endpoint {endpoint} unreachable: {source}")]
    ControlUnreachable {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Control command '{command}' timed out after {secs} seconds")]
    ControlTimeout { command: String, secs: u64 },

    #[error("Control connection closed before a reply arrived")]
    ControlClosed,

    #[error("Control protocol error: {0}")]
    ControlProtocol(String),

    #[error("Remote fault in '{command}': {message}")]
    RemoteFault { command: String, message: String },

    // === Event Channel Errors ===
    #[error("Event protocol error: {0}")]
    EventProtocol(String),

    #[error("Call stack underflow: '{command}' arrived with no open frame")]
    StackUnderflow { command: String },

    // === Session Errors ===
    #[error("Cannot {action} while the session is {state}")]
    InvalidState { action: String, state: String },

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an unreachable-endpoint error
    pub fn control_unreachable(endpoint: impl ToString, source: io::Error) -> Self {
        Self::ControlUnreachable {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// Create a remote fault error
    pub fn remote_fault(command: &str, message: &str) -> Self {
        Self::RemoteFault {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl ToString) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// True for errors that come from talking to the control endpoint.
    ///
    /// These leave the session where it was; the user may retry.
    pub fn is_control_failure(&self) -> bool {
        matches!(
            self,
            Error::ControlUnreachable { .. }
                | Error::ControlTimeout { .. }
                | Error::ControlClosed
                | Error::ControlProtocol(_)
                | Error::RemoteFault { .. }
        )
    }

    /// True for contract violations that must abort the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StackUnderflow { .. })
    }
}
