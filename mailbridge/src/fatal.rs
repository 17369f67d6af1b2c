//! Failures the bridge cannot recover from on its own.
//!
//! Once a reconfiguration has stopped the services, bringing them back is
//! not optional. If that fails there is no caller left who could do anything
//! useful with the error, so it goes here instead and the daemon's run loop
//! shuts down.

use std::io;

use mailbridge_common::internal;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::ServiceError;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Failed to resolve gluon data path: {0}")]
    DataPath(#[source] io::Error),

    #[error("Failed to build IMAP server: {0}")]
    Build(#[source] ServiceError),

    #[error("Failed to add user {user_id} to IMAP server: {source}")]
    AddUser {
        user_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("Failed to serve IMAP: {0}")]
    ServeImap(#[source] ServiceError),

    #[error("Failed to serve SMTP: {0}")]
    ServeSmtp(#[source] ServiceError),

    #[error("Cancelled while re-adding users to the IMAP server")]
    Cancelled,
}

pub type FatalReceiver = mpsc::UnboundedReceiver<FatalError>;

/// Sending half of the fatal channel.
#[derive(Debug, Clone)]
pub struct FatalReporter(mpsc::UnboundedSender<FatalError>);

impl FatalReporter {
    pub fn report(&self, err: FatalError) {
        internal!(level = ERROR, "Fatal: {err}");

        if self.0.send(err).is_err() {
            internal!(level = WARN, "Nobody is listening for fatal errors");
        }
    }
}

pub fn channel() -> (FatalReporter, FatalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FatalReporter(tx), rx)
}
