//! Blob files under the cache root.
//!
//! Writes land in a temporary sibling and are renamed into place, so a reader
//! sees either the previous blob or the complete new one. Deletes are best
//! effort and never fail the caller.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;

use crate::Error;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem store for payloads too large to inline.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a blob given its relative address.
    pub fn path_of(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write `bytes` at `relative`, creating parent directories and replacing
    /// any existing blob.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<(), Error> {
        let path = self.path_of(relative);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        let tmp = temp_sibling(&path);

        fs::create_dir_all(&parent).await.map_err(|e| Error::io(&parent, e))?;
        match fs::write(&tmp, bytes).await {
            Ok(()) => {}
            // The directory reclaimer removed the parent between mkdir and write.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %parent.display(), "blob parent vanished, recreating");
                fs::create_dir_all(&parent).await.map_err(|e| Error::io(&parent, e))?;
                fs::write(&tmp, bytes).await.map_err(|e| Error::io(&tmp, e))?;
            }
            Err(e) => return Err(Error::io(&tmp, e)),
        }

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::io(&path, e));
        }

        tracing::debug!(path = %path.display(), size = bytes.len(), "wrote blob");
        Ok(())
    }

    /// Read the blob at `relative`.
    ///
    /// Returns None if no file exists there.
    pub async fn read(&self, relative: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.path_of(relative);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Delete the blob at `relative`.
    ///
    /// Returns whether a file was removed. A missing file is not an error and
    /// other failures are logged, not returned.
    pub async fn delete(&self, relative: &str) -> bool {
        let path = self.path_of(relative);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "deleted blob");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete blob");
                false
            }
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{n}.tmp", std::process::id()));
    path.with_file_name(name)
}
