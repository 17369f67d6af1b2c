//! Hooks into the host system that the bridge toggles from its settings.

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use mailbridge_common::internal;

use crate::vault::UpdateChannel;

/// Launch-at-login registration.
pub trait Autostarter: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// # Errors
    /// If the registration cannot be written.
    fn enable(&self) -> io::Result<()>;

    /// # Errors
    /// If the registration cannot be removed.
    fn disable(&self) -> io::Result<()>;
}

/// Remembers the requested state without touching the host.
#[derive(Debug, Default)]
pub struct NoopAutostarter {
    enabled: AtomicBool,
}

impl NoopAutostarter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }
}

impl Autostarter for NoopAutostarter {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn enable(&self) -> io::Result<()> {
        internal!(level = DEBUG, "Autostart enabled");
        self.enabled.store(true, Ordering::Release);
        Ok(())
    }

    fn disable(&self) -> io::Result<()> {
        internal!(level = DEBUG, "Autostart disabled");
        self.enabled.store(false, Ordering::Release);
        Ok(())
    }
}

/// Asks the updater to look for a new release.
pub trait UpdateTrigger: Send + Sync {
    fn check_now(&self, channel: UpdateChannel);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogUpdateTrigger;

impl UpdateTrigger for LogUpdateTrigger {
    fn check_now(&self, channel: UpdateChannel) {
        internal!(level = INFO, "Update check requested on {channel:?} channel");
    }
}
