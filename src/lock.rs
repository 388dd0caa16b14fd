//! Build lock serialising ingestion against serving.
//!
//! A build creates `<persist_dir>/.build.lock` exclusively and removes it
//! when the [`BuildLock`] guard drops. A second build fails to acquire the
//! lock, the query service refuses to start while the file exists, and a
//! running server answers `/ask` with 503 until it is gone. A lock left
//! behind by a crashed build must be removed by hand.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{RagError, Result};

pub const LOCK_FILE: &str = ".build.lock";

pub fn lock_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(LOCK_FILE)
}

/// Whether a build currently holds the lock for `persist_dir`.
pub fn is_locked(persist_dir: &Path) -> bool {
    lock_path(persist_dir).exists()
}

/// Guard for an in-progress build.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    /// Acquire the lock, creating `persist_dir` if needed.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] when another build already holds the lock.
    pub fn acquire(persist_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(persist_dir)?;
        let path = lock_path(persist_dir);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RagError::Config(format!(
                    "another build is in progress ({} exists)",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        debug!(path = %path.display(), "acquired build lock");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove build lock");
        }
    }
}
