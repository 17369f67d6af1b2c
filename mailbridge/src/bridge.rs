use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use mailbridge_common::internal;
use parking_lot::{Mutex, RwLock};

use crate::{
    error::UserError,
    fatal::{FatalError, FatalReceiver, FatalReporter},
    fsops::{DirOps, LocalDirOps},
    integration::{Autostarter, LogUpdateTrigger, NoopAutostarter, UpdateTrigger},
    locator::Locator,
    server::{ImapServer, ImapServerFactory, SmtpServer},
    settings::ReconfigureState,
    users::{UserBinding, UsersLock},
    vault::Vault,
};

/// The running bridge: its servers, its accounts and its settings.
///
/// Cloning is cheap and every clone drives the same bridge.
#[derive(Clone)]
pub struct Bridge {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) vault: Arc<dyn Vault>,
    pub(crate) locator: Arc<dyn Locator>,
    pub(crate) imap_factory: Arc<dyn ImapServerFactory>,
    /// Replaced wholesale whenever the cache moves.
    pub(crate) imap: RwLock<Arc<dyn ImapServer>>,
    pub(crate) smtp: Arc<dyn SmtpServer>,
    pub(crate) dir_ops: Arc<dyn DirOps>,
    pub(crate) autostarter: Arc<dyn Autostarter>,
    pub(crate) updater: Arc<dyn UpdateTrigger>,
    pub(crate) users: UsersLock,
    pub(crate) host: IpAddr,
    pub(crate) fatal: FatalReporter,
    pub(crate) state: Mutex<ReconfigureState>,
}

/// Assembles a [`Bridge`] from its collaborators.
///
/// The vault, locator and both servers are required; everything else has a
/// stand-alone default.
pub struct BridgeBuilder {
    vault: Arc<dyn Vault>,
    locator: Arc<dyn Locator>,
    imap_factory: Arc<dyn ImapServerFactory>,
    smtp: Arc<dyn SmtpServer>,
    dir_ops: Arc<dyn DirOps>,
    autostarter: Arc<dyn Autostarter>,
    updater: Arc<dyn UpdateTrigger>,
    users: UsersLock,
    host: IpAddr,
}

impl BridgeBuilder {
    pub fn new(
        vault: Arc<dyn Vault>,
        locator: Arc<dyn Locator>,
        imap_factory: Arc<dyn ImapServerFactory>,
        smtp: Arc<dyn SmtpServer>,
    ) -> Self {
        Self {
            vault,
            locator,
            imap_factory,
            smtp,
            dir_ops: Arc::new(LocalDirOps),
            autostarter: Arc::new(NoopAutostarter::default()),
            updater: Arc::new(LogUpdateTrigger),
            users: UsersLock::new(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    #[must_use]
    pub fn dir_ops(mut self, dir_ops: Arc<dyn DirOps>) -> Self {
        self.dir_ops = dir_ops;
        self
    }

    #[must_use]
    pub fn autostarter(mut self, autostarter: Arc<dyn Autostarter>) -> Self {
        self.autostarter = autostarter;
        self
    }

    #[must_use]
    pub fn updater(mut self, updater: Arc<dyn UpdateTrigger>) -> Self {
        self.updater = updater;
        self
    }

    /// Share an existing lock, e.g. with a sync pass that must not overlap
    /// account changes.
    #[must_use]
    pub fn users(mut self, users: UsersLock) -> Self {
        self.users = users;
        self
    }

    #[must_use]
    pub const fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Build the first IMAP server over the vault's cache directory.
    ///
    /// # Errors
    /// If the data path cannot be resolved or the server cannot be built.
    pub fn build(self, fatal: FatalReporter) -> Result<Bridge, FatalError> {
        let data_dir = self.locator.gluon_data_path().map_err(FatalError::DataPath)?;
        let imap = self
            .imap_factory
            .build(&self.vault.gluon_dir(), &data_dir)
            .map_err(FatalError::Build)?;

        Ok(Bridge {
            inner: Arc::new(Inner {
                vault: self.vault,
                locator: self.locator,
                imap_factory: self.imap_factory,
                imap: RwLock::new(imap),
                smtp: self.smtp,
                dir_ops: self.dir_ops,
                autostarter: self.autostarter,
                updater: self.updater,
                users: self.users,
                host: self.host,
                fatal,
                state: Mutex::new(ReconfigureState::Idle),
            }),
        })
    }
}

impl Bridge {
    pub fn users(&self) -> &UsersLock {
        &self.inner.users
    }

    /// The IMAP server currently in use.
    pub fn imap(&self) -> Arc<dyn ImapServer> {
        Arc::clone(&self.inner.imap.read())
    }

    pub fn imap_addr(&self) -> SocketAddr {
        SocketAddr::new(self.inner.host, self.inner.vault.imap_port())
    }

    pub fn smtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.inner.host, self.inner.vault.smtp_port())
    }

    /// Start both endpoints.
    ///
    /// # Errors
    /// If either endpoint cannot be served.
    pub async fn start(&self) -> Result<(), FatalError> {
        self.imap()
            .serve(self.imap_addr(), self.inner.vault.imap_ssl())
            .await
            .map_err(FatalError::ServeImap)?;

        self.inner
            .smtp
            .serve(self.smtp_addr(), self.inner.vault.smtp_ssl())
            .await
            .map_err(FatalError::ServeSmtp)
    }

    /// Close both endpoints, logging rather than returning failures.
    pub async fn stop(&self) {
        if let Err(err) = self.imap().close().await {
            internal!(level = ERROR, "Failed to close IMAP: {err}");
        }

        if let Err(err) = self.inner.smtp.close().await {
            internal!(level = ERROR, "Failed to close SMTP: {err}");
        }
    }

    /// Serve until a termination signal arrives or something fatal is
    /// reported.
    ///
    /// # Errors
    /// If the endpoints cannot be started, the signal handlers cannot be
    /// installed, or a fatal error is received.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(&self, mut fatal: FatalReceiver) -> anyhow::Result<()> {
        self.start().await?;

        internal!(level = INFO, "Bridge running");

        let ret = tokio::select! {
            Some(err) = fatal.recv() => Err(anyhow::Error::new(err)),
            r = shutdown() => r,
        };

        internal!(level = INFO, "Shutting down...");
        self.stop().await;

        ret
    }

    /// Log an account in and attach it to the IMAP server.
    ///
    /// # Errors
    /// If the account is already logged in or the server refuses it.
    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %binding.user_id))]
    pub async fn login(&self, mut binding: UserBinding) -> Result<(), UserError> {
        let mut users = self.inner.users.write().await;

        if users.contains(&binding.user_id) {
            return Err(UserError::AlreadyLoggedIn(binding.user_id));
        }

        binding.show_all_mail = self.inner.vault.show_all_mail();

        if let Err(source) = self.imap().add_user(&binding).await {
            return Err(UserError::Attach {
                user_id: binding.user_id,
                source,
            });
        }

        internal!(level = INFO, "User {} logged in", binding.user_id);
        users.insert(binding);
        Ok(())
    }

    /// Log an account out and detach it from the IMAP server.
    ///
    /// # Errors
    /// If the account is not logged in.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn logout(&self, user_id: &str) -> Result<UserBinding, UserError> {
        let mut users = self.inner.users.write().await;

        let binding = users
            .remove(user_id)
            .ok_or_else(|| UserError::NotLoggedIn(user_id.to_string()))?;

        if let Err(err) = self.imap().remove_user(user_id).await {
            internal!(level = WARN, "Failed to detach user {user_id} from IMAP: {err}");
        }

        internal!(level = INFO, "User {user_id} logged out");
        Ok(binding)
    }
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}
