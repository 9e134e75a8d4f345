use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, warn};

use crate::error::Error;

/// Scoped exclusive lock against a sibling lockfile. Held from before
/// the guarded file is opened until the guard is dropped; a second
/// acquirer fails with `Error::LockUnavailable` rather than blocking.
#[derive(Debug)]
pub struct ScopedLock {
    lock_path: PathBuf,
}

impl ScopedLock {
    pub fn acquire(target: &Path) -> Result<Self> {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lck");
        let lock_path = target.with_file_name(name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {
                debug!("acquired lock {}", lock_path.display());
                Ok(Self { lock_path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(Error::LockUnavailable(lock_path).into())
            }
            Err(e) => Err(Error::ArchiveIo(e).into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!("couldn't remove lockfile {}: {e}", self.lock_path.display());
        }
    }
}
