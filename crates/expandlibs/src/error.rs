use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds that callers may want to tell apart. Operations return
/// `anyhow::Result`, so these are recovered with `Error::downcast_ref`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("another writer holds the lock at {0}")]
    LockUnavailable(PathBuf),
    #[error("archive I/O failed: {0}")]
    ArchiveIo(#[from] std::io::Error),
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),
    #[error("{tool} exited with status {status}")]
    ToolFailure { tool: String, status: i32 },
}
