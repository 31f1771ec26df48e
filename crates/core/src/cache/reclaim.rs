//! Removal of directory subtrees that no longer hold any file.
//!
//! The walk is post-order: a directory is removed only after every child
//! directory reported itself removed. Removal uses `remove_dir`, which refuses
//! a non-empty directory, so a blob written concurrently keeps its branch.

use std::io::ErrorKind;
use std::path::Path;

/// Remove `dir` and every descendant directory if the subtree contains no files.
///
/// Returns true if `dir` itself was removed. A missing `dir` is a no-op that
/// returns false.
pub fn reclaim(dir: &Path) -> bool {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return false,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "failed to list directory");
            return false;
        }
    };

    let mut empty = true;
    for entry in entries {
        let child_empty = match entry {
            Ok(entry) => match entry.file_type() {
                Ok(kind) if kind.is_dir() => reclaim(&entry.path()),
                Ok(_) => false,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to stat entry");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "failed to read directory entry");
                false
            }
        };
        empty = child_empty && empty;
    }

    empty && remove_if_empty(dir)
}

/// Reclaim every subdirectory of `root`, keeping `root` itself.
///
/// Returns the number of direct subdirectories removed.
pub fn reclaim_within(root: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .filter(|entry| reclaim(&entry.path()))
        .count()
}

fn remove_if_empty(dir: &Path) -> bool {
    match std::fs::remove_dir(dir) {
        Ok(()) => true,
        // Already gone: someone else reclaimed it.
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "directory kept");
            false
        }
    }
}
