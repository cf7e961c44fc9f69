//! Checkpoint artifacts.
//!
//! Every index configuration owns three artifacts derived from its prefix:
//! the trained model (`<prefix>.info`), the vector storage (`<prefix>.idx`)
//! and the retrieval results (`<prefix>-result.mat`). An artifact that exists
//! is trusted as-is; nothing here checks whether it is stale.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use hdidx_error::{ErrorCodes, HdidxError};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Info,
    Storage,
    Result,
}

impl ArtifactKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Info => ".info",
            ArtifactKind::Storage => ".idx",
            ArtifactKind::Result => "-result.mat",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Info => f.write_str("info"),
            ArtifactKind::Storage => f.write_str("storage"),
            ArtifactKind::Result => f.write_str("result"),
        }
    }
}

pub fn artifact_location(prefix: &str, kind: ArtifactKind) -> String {
    format!("{}{}", prefix, kind.suffix())
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact `{0}` does not exist")]
    NotFound(String),
    #[error("Failed to access artifact `{location}`: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

impl HdidxError for ArtifactError {
    fn code(&self) -> ErrorCodes {
        match self {
            ArtifactError::NotFound(_) => ErrorCodes::NotFound,
            ArtifactError::Io { source, .. } => source.code(),
        }
    }
}

/// Existence checks and whole-artifact reads and writes, keyed by index
/// prefix and artifact kind.
pub trait ArtifactStore {
    fn exists(&self, prefix: &str, kind: ArtifactKind) -> Result<bool, ArtifactError>;
    fn read(&self, prefix: &str, kind: ArtifactKind) -> Result<Vec<u8>, ArtifactError>;
    fn write(&self, prefix: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Where the artifact lives. Storage backends are opened at this location.
    fn location(&self, prefix: &str, kind: ArtifactKind) -> String {
        artifact_location(prefix, kind)
    }
}

/// Artifacts as files next to the prefix path.
#[derive(Clone, Debug, Default)]
pub struct LocalArtifactStore;

impl LocalArtifactStore {
    pub fn new() -> Self {
        LocalArtifactStore
    }

    fn io_error(location: &str, source: std::io::Error) -> ArtifactError {
        ArtifactError::Io {
            location: location.to_string(),
            source,
        }
    }

    // Writes into a temporary sibling and renames it over the target, so a
    // reader never observes a partially written artifact.
    fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let mut file = tempfile::NamedTempFile::new_in(&parent)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn exists(&self, prefix: &str, kind: ArtifactKind) -> Result<bool, ArtifactError> {
        let location = self.location(prefix, kind);
        Path::new(&location)
            .try_exists()
            .map_err(|err| Self::io_error(&location, err))
    }

    fn read(&self, prefix: &str, kind: ArtifactKind) -> Result<Vec<u8>, ArtifactError> {
        let location = self.location(prefix, kind);
        std::fs::read(&location).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ArtifactError::NotFound(location.clone()),
            _ => Self::io_error(&location, err),
        })
    }

    fn write(&self, prefix: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<(), ArtifactError> {
        let location = self.location(prefix, kind);
        Self::write_atomically(Path::new(&location), bytes)
            .map_err(|err| Self::io_error(&location, err))?;
        tracing::debug!("Wrote {} bytes to {}", bytes.len(), location);
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryArtifacts {
    entries: HashMap<(String, ArtifactKind), Vec<u8>>,
    writes: usize,
}

/// Artifacts held in process memory. Shared by reference, so a storage
/// backend under test can record its own artifact through the same store the
/// pipeline checks.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    inner: Mutex<InMemoryArtifacts>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` calls so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn exists(&self, prefix: &str, kind: ArtifactKind) -> Result<bool, ArtifactError> {
        Ok(self
            .inner
            .lock()
            .entries
            .contains_key(&(prefix.to_string(), kind)))
    }

    fn read(&self, prefix: &str, kind: ArtifactKind) -> Result<Vec<u8>, ArtifactError> {
        self.inner
            .lock()
            .entries
            .get(&(prefix.to_string(), kind))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(self.location(prefix, kind)))
    }

    fn write(&self, prefix: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<(), ArtifactError> {
        let mut inner = self.inner.lock();
        inner
            .entries
            .insert((prefix.to_string(), kind), bytes.to_vec());
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locations_follow_prefix() {
        assert_eq!(
            artifact_location("/exp/sift_pq_nsubq8", ArtifactKind::Info),
            "/exp/sift_pq_nsubq8.info"
        );
        assert_eq!(
            artifact_location("/exp/sift_sh_nbits64", ArtifactKind::Storage),
            "/exp/sift_sh_nbits64.idx"
        );
        assert_eq!(
            artifact_location("/exp/sift_sh_nbits64", ArtifactKind::Result),
            "/exp/sift_sh_nbits64-result.mat"
        );
    }

    #[test]
    fn test_local_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("nested").join("toy_pq_nsubq2");
        let prefix = prefix.to_str().unwrap();
        let store = LocalArtifactStore::new();

        assert!(!store.exists(prefix, ArtifactKind::Info).unwrap());
        assert!(matches!(
            store.read(prefix, ArtifactKind::Info),
            Err(ArtifactError::NotFound(_))
        ));
        store.write(prefix, ArtifactKind::Info, b"model").unwrap();
        assert!(store.exists(prefix, ArtifactKind::Info).unwrap());
        assert!(!store.exists(prefix, ArtifactKind::Result).unwrap());
        assert_eq!(store.read(prefix, ArtifactKind::Info).unwrap(), b"model");

        // No temporary files are left next to the artifact.
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_in_memory_store_counts_writes() {
        let store = InMemoryArtifactStore::new();
        assert!(store.is_empty());
        store.write("p", ArtifactKind::Result, &[1, 2]).unwrap();
        store.write("p", ArtifactKind::Result, &[3]).unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.read("p", ArtifactKind::Result).unwrap(), vec![3]);
        assert!(!store.exists("q", ArtifactKind::Result).unwrap());
        assert_eq!(
            store.read("q", ArtifactKind::Info).unwrap_err().code(),
            ErrorCodes::NotFound
        );
    }
}
