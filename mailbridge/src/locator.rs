use std::{
    io,
    path::{Component, Path, PathBuf},
};

use mailbridge_common::internal;

/// Name of the cache directory created under any user-chosen location.
pub const GLUON_DIR_NAME: &str = "gluon";

/// Where the message store lives inside a gluon directory.
pub fn gluon_store_path(gluon_dir: &Path) -> PathBuf {
    gluon_dir.join("backend").join("store")
}

/// Fold `.` and `..` out of `path` without touching the filesystem.
///
/// A `..` directly below the root is dropped; leading `..` on a relative
/// path are kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normal = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normal.components().next_back() {
                Some(Component::Normal(_)) => {
                    normal.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::CurDir | Component::ParentDir) | None => normal.push(".."),
            },
            other => normal.push(other),
        }
    }

    normal
}

/// Resolves logical locations to directories, creating them on demand.
pub trait Locator: Send + Sync {
    /// Directory holding the vault.
    ///
    /// # Errors
    /// If the directory cannot be created.
    fn settings_path(&self) -> io::Result<PathBuf>;

    /// Directory for the IMAP server's database.
    ///
    /// # Errors
    /// If the directory cannot be created.
    fn gluon_data_path(&self) -> io::Result<PathBuf>;

    /// Default gluon directory used when the vault has none.
    ///
    /// # Errors
    /// If the directory cannot be created.
    fn gluon_cache_path(&self) -> io::Result<PathBuf>;

    /// Remove everything except the settings.
    ///
    /// # Errors
    /// If a directory exists but cannot be removed.
    fn clear(&self) -> io::Result<()>;
}

/// [`Locator`] rooted at a single base directory:
///
/// ```text
/// <base>/settings
/// <base>/data/gluon
/// <base>/cache/gluon
/// ```
#[derive(Debug, Clone)]
pub struct Locations {
    base: PathBuf,
}

impl Locations {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn provide(&self, path: PathBuf) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

impl Locator for Locations {
    fn settings_path(&self) -> io::Result<PathBuf> {
        self.provide(self.base.join("settings"))
    }

    fn gluon_data_path(&self) -> io::Result<PathBuf> {
        self.provide(self.base.join("data").join(GLUON_DIR_NAME))
    }

    fn gluon_cache_path(&self) -> io::Result<PathBuf> {
        self.provide(self.base.join("cache").join(GLUON_DIR_NAME))
    }

    fn clear(&self) -> io::Result<()> {
        for dir in ["data", "cache"] {
            let path = self.base.join(dir);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => internal!(level = DEBUG, "Removed {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
