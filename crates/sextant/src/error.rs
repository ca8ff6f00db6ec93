//! Error types for client session operations.

use std::time::Duration;

use thiserror::Error;

use crate::readiness::Subsystem;

/// Errors that can occur while talking to the analysis server.
#[derive(Debug, Error)]
pub enum Error {
    /// The project configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failed to spawn the analysis server process.
    #[error("failed to start analysis server '{command}': {source}")]
    Spawn {
        /// The command that failed to spawn.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Analysis server executable not found.
    #[error("{command} not found\n\n{install_hint}")]
    NotFound {
        /// The command that was not found.
        command: String,
        /// Installation instructions for the missing command.
        install_hint: String,
    },

    /// The server started but never became ready.
    #[error("analysis server did not become ready: {0}")]
    StartupFailed(String),

    /// A start was requested while a server is already running.
    #[error("analysis server is already running")]
    AlreadyRunning,

    /// Malformed wire data or a request that could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] sextant_protocol::Error),

    /// The connection closed while the request was outstanding.
    #[error("connection to the analysis server was lost")]
    ConnectionLost,

    /// A synchronous request exceeded its deadline.
    #[error("{request} timed out after {timeout:?}")]
    Timeout {
        /// The request kind that timed out.
        request: &'static str,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A request was refused because there is no live connection.
    #[error("not connected to the analysis server")]
    NotConnected,

    /// A request was refused because a server subsystem is not ready.
    #[error("the {0} is not ready yet")]
    NotReady(Subsystem),

    /// Invalid user input, caught before anything is sent.
    #[error("{0}")]
    UserInput(String),

    /// The server reported a failure for the request.
    #[error("server error: {0}")]
    Server(String),

    /// The server answered with a payload the request does not expect.
    #[error("unexpected {typehint} reply to {request}")]
    UnexpectedReply {
        /// The request kind.
        request: &'static str,
        /// Typehint of the payload received.
        typehint: &'static str,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a "not found" error with an install hint.
    #[must_use]
    pub fn not_found(command: &str, install_hint: &str) -> Self {
        Self::NotFound {
            command: command.to_string(),
            install_hint: install_hint.to_string(),
        }
    }

    /// Create a spawn failed error.
    #[must_use]
    pub fn spawn_failed(command: &str, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.to_string(),
            source,
        }
    }

    /// Whether the error belongs to the connection/startup layer rather than
    /// to a single request or a user mistake.
    #[must_use]
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Spawn { .. }
                | Self::NotFound { .. }
                | Self::StartupFailed(_)
                | Self::ConnectionLost
                | Self::Io(_)
        )
    }
}

/// A specialized Result type for client session operations.
pub type Result<T> = std::result::Result<T, Error>;
