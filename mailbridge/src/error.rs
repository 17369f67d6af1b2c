//! Error types for the bridge.
//!
//! The split follows what a caller can do about a failure:
//! - [`SettingsError`]: a settings change was refused or rolled back; the
//!   bridge is still serving and its durable state is consistent.
//! - [`UserError`]: a login or logout did not happen.
//! - [`crate::fatal::FatalError`]: the services could not be brought back
//!   up. These never come back through a normal return value.

use std::{io, path::PathBuf};

use mailbridge_common::error::ListenerError;
use thiserror::Error;

/// Failure of a collaborator that owns a network endpoint.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("User {0} is not known to this server")]
    UnknownUser(String),

    #[error("{0}")]
    Rejected(String),
}

/// Durable settings could not be read or written.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error on vault {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode vault: {0}")]
    Encode(#[from] ron::Error),

    #[error("Failed to decode vault {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("Vault is read-only: {0}")]
    ReadOnly(String),
}

/// Which endpoint a suspension or restart failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Imap,
    Smtp,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Imap => "IMAP",
            Self::Smtp => "SMTP",
        })
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    /// The requested cache directory is the one already in use.
    #[error("New gluon dir is the same as the old one: {}", .0.display())]
    SameGluonDir(PathBuf),

    /// Services could not be stopped; nothing was changed.
    #[error("Failed to close {service}: {source}")]
    Suspend {
        service: Service,
        #[source]
        source: ServiceError,
    },

    /// Copying the cache failed; the previous directory is still in use.
    #[error("Failed to copy gluon dir from {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The new value could not be persisted.
    #[error("Failed to persist setting: {0}")]
    Persist(#[from] VaultError),

    /// An endpoint did not come back after a port or TLS change.
    #[error("Failed to restart {service}: {source}")]
    Restart {
        service: Service,
        #[source]
        source: ServiceError,
    },

    #[error("Failed to {action} autostart: {source}")]
    Autostart {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to resolve path: {0}")]
    Locator(#[source] io::Error),

    #[error("Settings task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SettingsError {
    /// Whether the rejected request left everything exactly as it was.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::SameGluonDir(_))
    }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("User {0} is already logged in")]
    AlreadyLoggedIn(String),

    #[error("User {0} is not logged in")]
    NotLoggedIn(String),

    #[error("Failed to attach user {user_id} to the IMAP server: {source}")]
    Attach {
        user_id: String,
        #[source]
        source: ServiceError,
    },
}
