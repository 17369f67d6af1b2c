use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::locator::normalize;

/// Directory tree primitives used when relocating the cache.
pub trait DirOps: Send + Sync {
    /// Copy the contents of `src` into `dst`, creating `dst` as needed.
    ///
    /// `dst` must be absent or empty, and must not overlap `src`. Either
    /// violation is reported before anything is written.
    ///
    /// # Errors
    /// On the first entry that cannot be read or written. Whatever was
    /// already copied stays in `dst`.
    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Remove `path` and everything below it.
    ///
    /// # Errors
    /// If any entry cannot be removed.
    fn remove_tree(&self, path: &Path) -> io::Result<()>;
}

/// [`DirOps`] on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirOps;

impl DirOps for LocalDirOps {
    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()> {
        if !fs::metadata(src)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("Expected {} to be a Directory, but it is not", src.display()),
            ));
        }

        let (from, to) = (fs::canonicalize(src)?, resolve(dst)?);
        if to.starts_with(&from) || from.starts_with(&to) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Cannot copy {} onto itself at {}", src.display(), dst.display()),
            ));
        }

        match fs::read_dir(dst) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        format!("Refusing to copy into non-empty {}", dst.display()),
                    ));
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        copy_dir(src, dst)
    }

    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

/// Canonicalize the deepest existing ancestor of `path` and append the rest.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let path = normalize(&std::path::absolute(path)?);
    let mut missing = Vec::new();
    let mut existing = path.as_path();

    loop {
        match fs::canonicalize(existing) {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(err);
                };
                missing.push(name);
                existing = parent;
            }
            Err(err) => return Err(err),
        }
    }
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }

    Ok(())
}
