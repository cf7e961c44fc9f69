//! Vector storage backends.
//!
//! An index keeps its encoded base vectors in a [`VectorStore`], a map from
//! base row position to code bytes. The backend is chosen by name:
//!
//! - `local` persists the map to a single file at the configured path and
//!   reopens it on later runs.
//! - `memory` keeps the map in process memory only.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hdidx_error::{ErrorCodes, HdidxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const STORE_MAGIC: &[u8; 8] = b"HDIDXIDX";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Local,
    Memory,
}

impl StorageBackend {
    /// Whether stored vectors outlive the process. A non-persistent store
    /// starts empty every time it is opened, whatever `clear` says.
    pub fn is_persistent(&self) -> bool {
        match self {
            StorageBackend::Local => true,
            StorageBackend::Memory => false,
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Local => f.write_str("local"),
            StorageBackend::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = VectorStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(VectorStoreError::UnknownBackend(s.to_string())),
        }
    }
}

/// Where and how to open a vector store.
/// # Fields
/// - backend: Which store implementation to use.
/// - path: The location of the store. Ignored by the memory backend.
/// - clear: Wipe existing contents before use. When unset, an existing store
///   at `path` is attached as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
    pub clear: bool,
}

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Unknown storage backend `{0}`")]
    UnknownBackend(String),
    #[error("Id {0} is already present in the store")]
    DuplicateId(u32),
    #[error("Store at `{0}` is corrupt")]
    Corrupt(String),
    #[error("Failed to encode or decode store: {0}")]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HdidxError for VectorStoreError {
    fn code(&self) -> ErrorCodes {
        match self {
            VectorStoreError::UnknownBackend(_) => ErrorCodes::InvalidArgument,
            VectorStoreError::DuplicateId(_) => ErrorCodes::AlreadyExists,
            VectorStoreError::Corrupt(_) => ErrorCodes::DataLoss,
            VectorStoreError::Encoding(_) => ErrorCodes::DataLoss,
            VectorStoreError::Io(err) => err.code(),
        }
    }
}

pub trait VectorStore: Send {
    /// Stores `code` under `id`. Ids are written once.
    fn put(&mut self, id: u32, code: Vec<u8>) -> Result<(), VectorStoreError>;
    fn get(&self, id: u32) -> Option<&[u8]>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// All entries in ascending id order.
    fn scan(&self) -> Box<dyn Iterator<Item = (u32, &[u8])> + '_>;
    /// Makes every `put` so far durable.
    fn flush(&mut self) -> Result<(), VectorStoreError>;
}

pub fn open_vector_store(config: &StorageConfig) -> Result<Box<dyn VectorStore>, VectorStoreError> {
    match config.backend {
        StorageBackend::Local => Ok(Box::new(LocalVectorStore::open(
            &config.path,
            config.clear,
        )?)),
        StorageBackend::Memory => Ok(Box::new(MemoryVectorStore::default())),
    }
}

fn insert_once(
    entries: &mut BTreeMap<u32, Vec<u8>>,
    id: u32,
    code: Vec<u8>,
) -> Result<(), VectorStoreError> {
    match entries.entry(id) {
        std::collections::btree_map::Entry::Occupied(_) => Err(VectorStoreError::DuplicateId(id)),
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(code);
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct MemoryVectorStore {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl VectorStore for MemoryVectorStore {
    fn put(&mut self, id: u32, code: Vec<u8>) -> Result<(), VectorStoreError> {
        insert_once(&mut self.entries, id, code)
    }

    fn get(&self, id: u32) -> Option<&[u8]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn scan(&self) -> Box<dyn Iterator<Item = (u32, &[u8])> + '_> {
        Box::new(self.entries.iter().map(|(id, code)| (*id, code.as_slice())))
    }

    fn flush(&mut self) -> Result<(), VectorStoreError> {
        Ok(())
    }
}

/// A store persisted as one file. The whole map is held in memory and
/// rewritten on `flush`; the file only appears once the first flush
/// completes, so an interrupted ingestion leaves no file behind.
pub struct LocalVectorStore {
    path: PathBuf,
    entries: BTreeMap<u32, Vec<u8>>,
    dirty: bool,
}

impl LocalVectorStore {
    pub fn open(path: impl AsRef<Path>, clear: bool) -> Result<Self, VectorStoreError> {
        let path = path.as_ref().to_path_buf();
        if clear {
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        let entries = if path.is_file() {
            tracing::debug!("Attaching to existing store at {}", path.display());
            Self::decode(&path, &std::fs::read(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(LocalVectorStore {
            path,
            entries,
            dirty: false,
        })
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>, VectorStoreError> {
        if bytes.len() < STORE_MAGIC.len() || &bytes[..STORE_MAGIC.len()] != STORE_MAGIC {
            return Err(VectorStoreError::Corrupt(path.display().to_string()));
        }
        Ok(bincode::deserialize(&bytes[STORE_MAGIC.len()..])?)
    }

    fn write_atomically(&self) -> Result<(), VectorStoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let mut file = tempfile::NamedTempFile::new_in(&parent)?;
        file.write_all(STORE_MAGIC)?;
        bincode::serialize_into(&mut file, &self.entries)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl VectorStore for LocalVectorStore {
    fn put(&mut self, id: u32, code: Vec<u8>) -> Result<(), VectorStoreError> {
        insert_once(&mut self.entries, id, code)?;
        self.dirty = true;
        Ok(())
    }

    fn get(&self, id: u32) -> Option<&[u8]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn scan(&self) -> Box<dyn Iterator<Item = (u32, &[u8])> + '_> {
        Box::new(self.entries.iter().map(|(id, code)| (*id, code.as_slice())))
    }

    fn flush(&mut self) -> Result<(), VectorStoreError> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        self.write_atomically()?;
        self.dirty = false;
        tracing::debug!(
            "Flushed {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
