use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use mailbridge_common::internal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Release track the updater follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateChannel {
    #[default]
    Stable,
    Early,
}

/// Everything the bridge persists between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the on-disk mail cache. The message store itself lives in
    /// `backend/store` below it.
    pub gluon_dir: PathBuf,
    pub imap_port: u16,
    pub imap_ssl: bool,
    pub smtp_port: u16,
    pub smtp_ssl: bool,
    pub show_all_mail: bool,
    pub autostart: bool,
    pub auto_update: bool,
    pub update_channel: UpdateChannel,
    pub proxy_allowed: bool,
    pub color_scheme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gluon_dir: PathBuf::new(),
            imap_port: 1143,
            imap_ssl: false,
            smtp_port: 1025,
            smtp_ssl: false,
            show_all_mail: true,
            autostart: true,
            auto_update: true,
            update_channel: UpdateChannel::default(),
            proxy_allowed: false,
            color_scheme: String::new(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn with_gluon_dir(gluon_dir: impl Into<PathBuf>) -> Self {
        Self {
            gluon_dir: gluon_dir.into(),
            ..Self::default()
        }
    }
}

/// Durable key-value store for [`Settings`].
///
/// Implementors provide a snapshot read, an atomic read-modify-write and a
/// reset; the typed accessors are derived from those. A successful write is
/// visible to every later read.
pub trait Vault: Send + Sync {
    fn settings(&self) -> Settings;

    /// Apply `f` to the current settings and persist the result.
    ///
    /// # Errors
    /// If the new settings cannot be persisted. The stored value is then
    /// unchanged.
    fn update(&self, f: &mut dyn FnMut(&mut Settings)) -> Result<(), VaultError>;

    /// Replace everything with defaults, keeping only `gluon_dir`.
    ///
    /// # Errors
    /// If the defaults cannot be persisted.
    fn reset(&self, gluon_dir: &Path) -> Result<(), VaultError>;

    fn gluon_dir(&self) -> PathBuf {
        self.settings().gluon_dir
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_gluon_dir(&self, dir: &Path) -> Result<(), VaultError> {
        self.update(&mut |s| s.gluon_dir = dir.to_path_buf())
    }

    fn imap_port(&self) -> u16 {
        self.settings().imap_port
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_imap_port(&self, port: u16) -> Result<(), VaultError> {
        self.update(&mut |s| s.imap_port = port)
    }

    fn imap_ssl(&self) -> bool {
        self.settings().imap_ssl
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_imap_ssl(&self, ssl: bool) -> Result<(), VaultError> {
        self.update(&mut |s| s.imap_ssl = ssl)
    }

    fn smtp_port(&self) -> u16 {
        self.settings().smtp_port
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_smtp_port(&self, port: u16) -> Result<(), VaultError> {
        self.update(&mut |s| s.smtp_port = port)
    }

    fn smtp_ssl(&self) -> bool {
        self.settings().smtp_ssl
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_smtp_ssl(&self, ssl: bool) -> Result<(), VaultError> {
        self.update(&mut |s| s.smtp_ssl = ssl)
    }

    fn show_all_mail(&self) -> bool {
        self.settings().show_all_mail
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_show_all_mail(&self, show: bool) -> Result<(), VaultError> {
        self.update(&mut |s| s.show_all_mail = show)
    }

    fn autostart(&self) -> bool {
        self.settings().autostart
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_autostart(&self, autostart: bool) -> Result<(), VaultError> {
        self.update(&mut |s| s.autostart = autostart)
    }

    fn auto_update(&self) -> bool {
        self.settings().auto_update
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_auto_update(&self, auto_update: bool) -> Result<(), VaultError> {
        self.update(&mut |s| s.auto_update = auto_update)
    }

    fn update_channel(&self) -> UpdateChannel {
        self.settings().update_channel
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_update_channel(&self, channel: UpdateChannel) -> Result<(), VaultError> {
        self.update(&mut |s| s.update_channel = channel)
    }

    fn proxy_allowed(&self) -> bool {
        self.settings().proxy_allowed
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_proxy_allowed(&self, allowed: bool) -> Result<(), VaultError> {
        self.update(&mut |s| s.proxy_allowed = allowed)
    }

    fn color_scheme(&self) -> String {
        self.settings().color_scheme
    }

    /// # Errors
    /// See [`Vault::update`].
    fn set_color_scheme(&self, scheme: &str) -> Result<(), VaultError> {
        self.update(&mut |s| s.color_scheme = scheme.to_string())
    }
}

/// Vault persisted as a RON file
///
/// Writes go to `<file>.tmp` first and are then renamed over the real file,
/// so a crash mid-write leaves either the old or the new settings on disk,
/// never a truncated mix. The in-memory copy is only replaced after the
/// rename succeeded, and readers take the same lock, so they never see a
/// value that failed to persist.
#[derive(Debug)]
pub struct FileVault {
    path: PathBuf,
    settings: Mutex<Settings>,
}

impl FileVault {
    /// Open the vault at `path`, creating it with defaults if missing.
    ///
    /// `gluon_dir` is only used when the file does not exist yet.
    ///
    /// # Errors
    /// If an existing file cannot be read or parsed, or a new one cannot be
    /// written.
    pub fn open(path: impl Into<PathBuf>, gluon_dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let path = path.into();

        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => ron::from_str(&content).map_err(|source| VaultError::Decode {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                internal!(level = INFO, "No vault at {}, creating one", path.display());
                let settings = Settings::with_gluon_dir(gluon_dir);
                persist(&path, &settings)?;
                settings
            }
            Err(source) => return Err(VaultError::Io { path, source }),
        };

        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn persist(path: &Path, settings: &Settings) -> Result<(), VaultError> {
    let io_err = |source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    };

    let content = ron::ser::to_string_pretty(settings, ron::ser::PrettyConfig::default())?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, content).map_err(io_err)?;
    std::fs::rename(&temp, path).map_err(io_err)
}

impl Vault for FileVault {
    fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut Settings)) -> Result<(), VaultError> {
        let mut current = self.settings.lock();
        let mut next = current.clone();
        f(&mut next);

        if next != *current {
            persist(&self.path, &next)?;
            *current = next;
        }

        Ok(())
    }

    fn reset(&self, gluon_dir: &Path) -> Result<(), VaultError> {
        let mut current = self.settings.lock();
        let next = Settings::with_gluon_dir(gluon_dir);
        persist(&self.path, &next)?;
        *current = next;
        Ok(())
    }
}

/// Vault that lives only in memory.
#[derive(Debug, Default)]
pub struct MemoryVault {
    settings: Mutex<Settings>,
}

impl MemoryVault {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl Vault for MemoryVault {
    fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut Settings)) -> Result<(), VaultError> {
        f(&mut self.settings.lock());
        Ok(())
    }

    fn reset(&self, gluon_dir: &Path) -> Result<(), VaultError> {
        *self.settings.lock() = Settings::with_gluon_dir(gluon_dir);
        Ok(())
    }
}
