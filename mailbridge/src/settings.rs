//! Live settings changes.
//!
//! Most settings are a vault write, sometimes followed by restarting one
//! endpoint. Moving the cache directory is the exception: it needs both
//! endpoints down while the store is copied, and they must come back up on
//! every path out of the procedure.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_util::FutureExt;
use mailbridge_common::internal;
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::Bridge,
    error::{Service, ServiceError, SettingsError},
    fatal::FatalError,
    fsops::DirOps,
    locator::{GLUON_DIR_NAME, gluon_store_path, normalize},
    users::UserRegistry,
    vault::UpdateChannel,
};

/// Where a cache relocation currently is.
///
/// `Idle` is both the initial and terminal state. A failed suspension goes
/// straight back to `Idle`; every later state passes through `Resuming`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconfigureState {
    #[default]
    Idle,
    Suspending,
    Mutating,
    RollingBack,
    Persisting,
    Resuming,
}

impl Bridge {
    pub fn reconfigure_state(&self) -> ReconfigureState {
        *self.inner.state.lock()
    }

    fn transition(&self, next: ReconfigureState) {
        let mut state = self.inner.state.lock();
        internal!(level = DEBUG, "Reconfiguration {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// The directory the message store currently lives under.
    pub fn gluon_cache_dir(&self) -> PathBuf {
        self.inner.vault.gluon_dir()
    }

    /// # Errors
    /// If the data directory cannot be created.
    pub fn gluon_data_dir(&self) -> Result<PathBuf, SettingsError> {
        self.inner
            .locator
            .gluon_data_path()
            .map_err(SettingsError::Locator)
    }

    /// Move the message store to `<new_dir>/gluon`.
    ///
    /// `new_dir` is compared and saved with `.` and `..` folded out. The
    /// store is never copied onto itself or into a non-empty directory.
    ///
    /// Both endpoints are stopped for the duration and are always started
    /// again before this returns, over whichever directory ended up in the
    /// vault. `cancel` only interrupts re-adding users to the rebuilt IMAP
    /// server; the copy itself always runs to completion. A failure to bring
    /// the endpoints back is not returned here: it goes to the fatal channel.
    ///
    /// The procedure runs on its own task, so dropping the returned future
    /// does not leave the endpoints down.
    ///
    /// # Errors
    /// - [`SettingsError::SameGluonDir`] if nothing would change.
    /// - [`SettingsError::Suspend`] if an endpoint would not stop. Nothing
    ///   was changed.
    /// - [`SettingsError::Move`] if the store could not be copied, or the
    ///   destination already holds files. The old directory is still in use.
    /// - [`SettingsError::Persist`] if the new directory could not be saved.
    ///   The old directory is still in use.
    ///
    /// # Panics
    /// Re-raises a panic from a collaborator once the endpoints are back up.
    #[tracing::instrument(level = "debug", skip(self, cancel))]
    pub async fn set_gluon_dir(&self, new_dir: &Path, cancel: CancellationToken) -> Result<(), SettingsError> {
        let bridge = self.clone();
        let new_dir = normalize(&new_dir.join(GLUON_DIR_NAME));

        match tokio::spawn(async move { bridge.relocate(new_dir, cancel).await }).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => Err(err.into()),
        }
    }

    async fn relocate(&self, new_dir: PathBuf, cancel: CancellationToken) -> Result<(), SettingsError> {
        let users = self.inner.users.write().await;

        let old_dir = self.inner.vault.gluon_dir();
        if normalize(&old_dir) == new_dir {
            return Err(SettingsError::SameGluonDir(new_dir));
        }

        internal!(
            level = INFO,
            "Moving gluon dir from {} to {}",
            old_dir.display(),
            new_dir.display()
        );

        self.transition(ReconfigureState::Suspending);
        if let Err(err) = self.suspend().await {
            self.transition(ReconfigureState::Idle);
            return Err(err);
        }

        self.transition(ReconfigureState::Mutating);
        let outcome = AssertUnwindSafe(self.move_store(&old_dir, &new_dir))
            .catch_unwind()
            .await;

        self.transition(ReconfigureState::Resuming);
        if let Err(err) = self.resume(&users, &cancel).await {
            self.inner.fatal.report(err);
        }
        self.transition(ReconfigureState::Idle);

        drop(users);

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Close IMAP, then SMTP.
    async fn suspend(&self) -> Result<(), SettingsError> {
        let imap = self.imap();

        imap.close().await.map_err(|source| SettingsError::Suspend {
            service: Service::Imap,
            source,
        })?;

        if let Err(source) = self.inner.smtp.close().await {
            // IMAP is already down; put it back before giving up.
            if let Err(err) = imap.serve(self.imap_addr(), self.inner.vault.imap_ssl()).await {
                self.inner.fatal.report(FatalError::ServeImap(err));
            }

            return Err(SettingsError::Suspend {
                service: Service::Smtp,
                source,
            });
        }

        Ok(())
    }

    async fn move_store(&self, old_dir: &Path, new_dir: &Path) -> Result<(), SettingsError> {
        let from = gluon_store_path(old_dir);
        let to = gluon_store_path(new_dir);

        let copied = {
            let (from, to) = (from.clone(), to.clone());
            self.on_blocking_pool(move |ops| ops.copy_tree(&from, &to)).await
        };

        if let Err(source) = copied {
            self.transition(ReconfigureState::RollingBack);
            internal!(level = ERROR, "Failed to copy gluon dir: {source}");

            // Point the vault back at the old tree, whatever was written to
            // it in the meantime.
            if let Err(err) = self.inner.vault.set_gluon_dir(old_dir) {
                internal!(level = ERROR, "Failed to restore gluon dir in vault: {err}");
            }

            return Err(SettingsError::Move { from, to, source });
        }

        self.transition(ReconfigureState::Persisting);
        if let Err(err) = self.inner.vault.set_gluon_dir(new_dir) {
            internal!(level = ERROR, "Failed to persist new gluon dir: {err}");

            // The destination was absent or empty before the copy.
            let copy = to.clone();
            if let Err(err) = self.on_blocking_pool(move |ops| ops.remove_tree(&copy)).await {
                internal!(level = WARN, "Failed to remove unused copy at {}: {err}", to.display());
            }

            return Err(err.into());
        }

        let old = from.clone();
        if let Err(err) = self.on_blocking_pool(move |ops| ops.remove_tree(&old)).await {
            internal!(level = ERROR, "Failed to remove old gluon dir {}: {err}", from.display());
        }

        Ok(())
    }

    /// Rebuild IMAP over the vault's directory, re-add every user, then serve
    /// IMAP and SMTP. The first failure stops the procedure.
    async fn resume(&self, users: &UserRegistry, cancel: &CancellationToken) -> Result<(), FatalError> {
        let data_dir = self
            .inner
            .locator
            .gluon_data_path()
            .map_err(FatalError::DataPath)?;

        let imap = self
            .inner
            .imap_factory
            .build(&self.inner.vault.gluon_dir(), &data_dir)
            .map_err(FatalError::Build)?;

        *self.inner.imap.write() = Arc::clone(&imap);

        for user in users.iter() {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(FatalError::Cancelled),

                added = imap.add_user(user) => added.map_err(|source| FatalError::AddUser {
                    user_id: user.user_id.clone(),
                    source,
                })?,
            }
        }

        imap.serve(self.imap_addr(), self.inner.vault.imap_ssl())
            .await
            .map_err(FatalError::ServeImap)?;

        self.inner
            .smtp
            .serve(self.smtp_addr(), self.inner.vault.smtp_ssl())
            .await
            .map_err(FatalError::ServeSmtp)?;

        internal!(level = INFO, "Services resumed with {} user(s)", users.len());
        Ok(())
    }

    async fn on_blocking_pool<F>(&self, op: F) -> io::Result<()>
    where
        F: FnOnce(&dyn DirOps) -> io::Result<()> + Send + 'static,
    {
        let ops = Arc::clone(&self.inner.dir_ops);

        match tokio::task::spawn_blocking(move || op(ops.as_ref())).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => Err(io::Error::other(err)),
        }
    }

    pub fn imap_port(&self) -> u16 {
        self.inner.vault.imap_port()
    }

    /// # Errors
    /// If the port cannot be saved or IMAP does not come back on it.
    pub async fn set_imap_port(&self, port: u16) -> Result<(), SettingsError> {
        let _users = self.inner.users.write().await;
        if port == self.imap_port() {
            return Ok(());
        }

        self.inner.vault.set_imap_port(port)?;
        self.restart_imap().await
    }

    pub fn imap_ssl(&self) -> bool {
        self.inner.vault.imap_ssl()
    }

    /// # Errors
    /// If the setting cannot be saved or IMAP does not come back.
    pub async fn set_imap_ssl(&self, ssl: bool) -> Result<(), SettingsError> {
        let _users = self.inner.users.write().await;
        if ssl == self.imap_ssl() {
            return Ok(());
        }

        self.inner.vault.set_imap_ssl(ssl)?;
        self.restart_imap().await
    }

    pub fn smtp_port(&self) -> u16 {
        self.inner.vault.smtp_port()
    }

    /// # Errors
    /// If the port cannot be saved or SMTP does not come back on it.
    pub async fn set_smtp_port(&self, port: u16) -> Result<(), SettingsError> {
        let _users = self.inner.users.write().await;
        if port == self.smtp_port() {
            return Ok(());
        }

        self.inner.vault.set_smtp_port(port)?;
        self.restart_smtp().await
    }

    pub fn smtp_ssl(&self) -> bool {
        self.inner.vault.smtp_ssl()
    }

    /// # Errors
    /// If the setting cannot be saved or SMTP does not come back.
    pub async fn set_smtp_ssl(&self, ssl: bool) -> Result<(), SettingsError> {
        let _users = self.inner.users.write().await;
        if ssl == self.smtp_ssl() {
            return Ok(());
        }

        self.inner.vault.set_smtp_ssl(ssl)?;
        self.restart_smtp().await
    }

    /// Caller holds the users write lock.
    async fn restart_imap(&self) -> Result<(), SettingsError> {
        let imap = self.imap();

        restart(
            Service::Imap,
            imap.close(),
            imap.serve(self.imap_addr(), self.inner.vault.imap_ssl()),
        )
        .await
    }

    async fn restart_smtp(&self) -> Result<(), SettingsError> {
        let smtp = &self.inner.smtp;

        restart(
            Service::Smtp,
            smtp.close(),
            smtp.serve(self.smtp_addr(), self.inner.vault.smtp_ssl()),
        )
        .await
    }

    pub fn show_all_mail(&self) -> bool {
        self.inner.vault.show_all_mail()
    }

    /// Apply to every logged-in user, then save.
    ///
    /// # Errors
    /// If the setting cannot be saved.
    pub async fn set_show_all_mail(&self, show: bool) -> Result<(), SettingsError> {
        let mut users = self.inner.users.write().await;
        let imap = self.imap();

        for user in users.iter_mut() {
            user.show_all_mail = show;

            if let Err(err) = imap.update_user(user).await {
                internal!(level = WARN, "Failed to update user {}: {err}", user.user_id);
            }
        }

        Ok(self.inner.vault.set_show_all_mail(show)?)
    }

    pub fn autostart(&self) -> bool {
        self.inner.vault.autostart()
    }

    /// # Errors
    /// If the setting cannot be saved or the host registration fails.
    pub fn set_autostart(&self, enabled: bool) -> Result<(), SettingsError> {
        if enabled != self.autostart() {
            self.inner.vault.set_autostart(enabled)?;
        }

        let autostarter = &self.inner.autostarter;
        if enabled == autostarter.is_enabled() {
            return Ok(());
        }

        if enabled {
            autostarter
                .enable()
                .map_err(|source| SettingsError::Autostart { action: "enable", source })
        } else {
            autostarter
                .disable()
                .map_err(|source| SettingsError::Autostart { action: "disable", source })
        }
    }

    pub fn auto_update(&self) -> bool {
        self.inner.vault.auto_update()
    }

    /// # Errors
    /// If the setting cannot be saved.
    pub fn set_auto_update(&self, enabled: bool) -> Result<(), SettingsError> {
        if enabled == self.auto_update() {
            return Ok(());
        }

        self.inner.vault.set_auto_update(enabled)?;
        self.inner.updater.check_now(self.update_channel());
        Ok(())
    }

    pub fn update_channel(&self) -> UpdateChannel {
        self.inner.vault.update_channel()
    }

    /// # Errors
    /// If the setting cannot be saved.
    pub fn set_update_channel(&self, channel: UpdateChannel) -> Result<(), SettingsError> {
        if channel == self.update_channel() {
            return Ok(());
        }

        self.inner.vault.set_update_channel(channel)?;
        self.inner.updater.check_now(channel);
        Ok(())
    }

    pub fn proxy_allowed(&self) -> bool {
        self.inner.vault.proxy_allowed()
    }

    /// # Errors
    /// If the setting cannot be saved.
    pub fn set_proxy_allowed(&self, allowed: bool) -> Result<(), SettingsError> {
        Ok(self.inner.vault.set_proxy_allowed(allowed)?)
    }

    pub fn color_scheme(&self) -> String {
        self.inner.vault.color_scheme()
    }

    /// # Errors
    /// If the setting cannot be saved.
    pub fn set_color_scheme(&self, scheme: &str) -> Result<(), SettingsError> {
        Ok(self.inner.vault.set_color_scheme(scheme)?)
    }

    /// Log everyone out, reset the vault and delete cached data.
    ///
    /// Every step is attempted even if an earlier one failed; failures are
    /// logged.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn factory_reset(&self) {
        internal!(level = WARN, "Factory reset requested");

        {
            let mut users = self.inner.users.write().await;
            let imap = self.imap();
            let drained: Vec<_> = users.drain().collect();

            for user in drained {
                if let Err(err) = imap.remove_user(&user.user_id).await {
                    internal!(level = ERROR, "Failed to detach user {}: {err}", user.user_id);
                }
                internal!(level = INFO, "User {} logged out", user.user_id);
            }
        }

        match self.inner.locator.gluon_cache_path() {
            Ok(gluon_dir) => {
                if let Err(err) = self.inner.vault.reset(&gluon_dir) {
                    internal!(level = ERROR, "Failed to reset vault: {err}");
                }
            }
            Err(err) => internal!(level = ERROR, "Failed to provide gluon dir: {err}"),
        }

        if let Err(err) = self.inner.locator.clear() {
            internal!(level = ERROR, "Failed to clear data paths: {err}");
        }
    }
}

async fn restart(
    service: Service,
    close: impl Future<Output = Result<(), ServiceError>>,
    serve: impl Future<Output = Result<(), ServiceError>>,
) -> Result<(), SettingsError> {
    internal!(level = INFO, "Restarting {service}");

    let failed = |source| SettingsError::Restart { service, source };
    close.await.map_err(failed)?;
    serve.await.map_err(failed)
}
