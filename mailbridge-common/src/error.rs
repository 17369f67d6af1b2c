//! Error types shared by the serving layer.
//!
//! These cover the generic accept loop in [`crate::listener`] and the
//! sessions it spawns. Bridge-level errors (settings, users, vault) live in
//! the `mailbridge` crate.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that can occur during session handling.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Protocol error occurred during session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection error occurred.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// Shutdown signal received.
    #[error("Shutdown requested")]
    Shutdown,
}

impl SessionError {
    /// Returns `true` if the error indicates a graceful shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// Errors that can occur in a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),

    /// The accept loop task ended abnormally.
    #[error("Listener task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// The listener is already accepting connections.
    #[error("Listener for {0} is already running")]
    AlreadyRunning(&'static str),
}
