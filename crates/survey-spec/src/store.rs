use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::ids::ParticipantId;
use crate::participant::Participant;

const FILE_PREFIX: &str = "participant-";
const FILE_EXTENSION: &str = "cbor";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode participant {id}: {source}")]
    Encode {
        id: ParticipantId,
        #[source]
        source: serde_cbor::Error,
    },
    #[error("failed to decode stored participant {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_cbor::Error,
    },
}

/// Durable home for participant snapshots.
///
/// `save` is called with the fully updated participant after every successful
/// transition and must replace the previous snapshot as a whole.
pub trait ParticipantStore: Send + Sync {
    fn save(&self, participant: &Participant) -> Result<(), StoreError>;
    fn load_all(&self) -> Result<Vec<Participant>, StoreError>;
}

pub fn encode(participant: &Participant) -> Result<Vec<u8>, StoreError> {
    serde_cbor::to_vec(participant).map_err(|source| StoreError::Encode {
        id: participant.id(),
        source,
    })
}

pub fn decode(bytes: &[u8], origin: impl Into<String>) -> Result<Participant, StoreError> {
    serde_cbor::from_slice(bytes).map_err(|source| StoreError::Decode {
        origin: origin.into(),
        source,
    })
}

/// Keeps encoded snapshots in memory; the default store of an engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<ParticipantId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl ParticipantStore for MemoryStore {
    fn save(&self, participant: &Participant) -> Result<(), StoreError> {
        let bytes = encode(participant)?;
        self.snapshots.lock().insert(participant.id(), bytes);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Participant>, StoreError> {
        self.snapshots
            .lock()
            .iter()
            .map(|(id, bytes)| decode(bytes, format!("memory:{}", id)))
            .collect()
    }
}

/// One `participant-<id>.cbor` file per participant.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Opens (creating if needed) the directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: ParticipantId) -> PathBuf {
        self.root
            .join(format!("{}{}.{}", FILE_PREFIX, id, FILE_EXTENSION))
    }
}

impl ParticipantStore for DirectoryStore {
    fn save(&self, participant: &Participant) -> Result<(), StoreError> {
        let bytes = encode(participant)?;
        let path = self.path_for(participant.id());
        let tmp = path.with_extension("cbor.tmp");
        fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(participant = %participant.id(), path = %path.display(), "participant saved");
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Participant>, StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.root.clone(),
            source,
        };
        let mut participants = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| {
                    name.starts_with(FILE_PREFIX)
                        && name.ends_with(&format!(".{}", FILE_EXTENSION))
                })
                .unwrap_or(false);
            if !is_snapshot {
                continue;
            }
            let bytes = fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            participants.push(decode(&bytes, path.display().to_string())?);
        }
        participants.sort_by_key(Participant::id);
        Ok(participants)
    }
}
