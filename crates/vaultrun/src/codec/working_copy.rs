//! Scoped plaintext copy of a dataset

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::codec::CodecError;

/// A decrypted dataset on disk, owned by a single run.
///
/// Call [`remove()`](Self::remove) once the script is done with it. If the
/// guard is dropped first, the file is removed synchronously in `Drop` and a
/// warning is logged.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
    removed: bool,
}

impl WorkingCopy {
    /// Write `plaintext` to a new file at `path`, readable only by the owner
    pub(crate) async fn create(path: PathBuf, plaintext: &[u8]) -> Result<Self, CodecError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| CodecError::io(&path, e))?;

        // Construct the guard before writing so a failed write still cleans up
        let copy = Self {
            path,
            removed: false,
        };
        file.write_all(plaintext)
            .await
            .map_err(|e| CodecError::io(&copy.path, e))?;
        file.flush().await.map_err(|e| CodecError::io(&copy.path, e))?;

        debug!(path = %copy.path.display(), len = plaintext.len(), "wrote working copy");
        Ok(copy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the plaintext file
    #[must_use = "removal errors should be handled"]
    pub async fn remove(mut self) -> Result<(), CodecError> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed working copy");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CodecError::io(&self.path, e)),
        }
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        warn!(
            path = %self.path.display(),
            "working copy dropped without explicit removal, removing now"
        );
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove working copy");
        }
    }
}
