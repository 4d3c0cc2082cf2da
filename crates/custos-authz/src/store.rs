//! Backing stores for cached assertions.
//!
//! The [`DecisionCache`](crate::cache::DecisionCache) keeps partitions in
//! memory and hands them to a [`CacheStore`] at explicit commit points, so
//! cached state can outlive the process when a data directory is configured.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::debug;

use crate::cache::Partition;
use crate::error::{AuthzError, AuthzResult};

/// Persistence for per-subject cache partitions.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Load the persisted partition for a subject, if any.
    fn load(&self, subject: &str) -> AuthzResult<Option<Partition>>;

    /// Persist a subject's partition, replacing any previous copy.
    fn save(&self, subject: &str, partition: &Partition) -> AuthzResult<()>;

    /// Remove a subject's persisted partition. Removing a missing partition
    /// is not an error.
    fn remove(&self, subject: &str) -> AuthzResult<()>;

    /// Whether saved state outlives the process.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// Store that keeps nothing; cached state lives only in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStore;

impl CacheStore for MemoryStore {
    fn load(&self, _subject: &str) -> AuthzResult<Option<Partition>> {
        Ok(None)
    }

    fn save(&self, _subject: &str, _partition: &Partition) -> AuthzResult<()> {
        Ok(())
    }

    fn remove(&self, _subject: &str) -> AuthzResult<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Store that writes one JSON document per subject into a directory.
///
/// Subjects are usually URIs, so file names are the URL-safe base64
/// encoding of the subject.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> AuthzResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AuthzError::cache(format!(
                "failed to create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    /// The directory holding persisted partitions.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, subject: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(subject.as_bytes())))
    }
}

impl CacheStore for FileStore {
    fn load(&self, subject: &str) -> AuthzResult<Option<Partition>> {
        let path = self.path_for(subject);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthzError::cache(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let partition = serde_json::from_slice(&content).map_err(|e| {
            AuthzError::cache(format!("corrupt cache file {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loaded persisted cache partition");
        Ok(Some(partition))
    }

    fn save(&self, subject: &str, partition: &Partition) -> AuthzResult<()> {
        let path = self.path_for(subject);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec(partition)?;

        fs::write(&tmp, content)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| {
                AuthzError::cache(format!("failed to write {}: {}", path.display(), e))
            })
    }

    fn remove(&self, subject: &str) -> AuthzResult<()> {
        let path = self.path_for(subject);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthzError::cache(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
