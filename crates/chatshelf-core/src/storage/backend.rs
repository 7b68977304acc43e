use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered change events per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Identifies the writer of a change so a store can ignore its own echoes,
/// the way a browser tab never receives its own `storage` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin(u64);

impl Origin {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// A key changed in durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: Origin,
}

/// Durable string key/value storage shared by every store in the process
/// (and, for file storage, by every process pointed at the same directory).
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str, origin: Origin) -> Result<(), StorageError>;

    fn remove(&self, key: &str, origin: Origin) -> Result<(), StorageError>;

    /// Change notifications for writes made through this storage handle.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

fn check_quota(quota: Option<u64>, needed: u64) -> Result<(), StorageError> {
    match quota {
        Some(quota) if needed > quota => Err(StorageError::QuotaExceeded { needed, quota }),
        _ => Ok(()),
    }
}

/// In-memory storage with an optional byte quota. Sharing one instance
/// between several stores models several tabs over the same origin.
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
    quota_bytes: Option<u64>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    pub fn with_quota(quota_bytes: Option<u64>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            quota_bytes,
            events,
        }
    }

    fn used_bytes_excluding(values: &HashMap<String, String>, key: &str) -> u64 {
        values
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str, origin: Origin) -> Result<(), StorageError> {
        {
            let mut values = self.values.write();
            let needed =
                Self::used_bytes_excluding(&values, key) + (key.len() + value.len()) as u64;
            check_quota(self.quota_bytes, needed)?;
            values.insert(key.to_string(), value.to_string());
        }
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            origin,
        });
        Ok(())
    }

    fn remove(&self, key: &str, origin: Origin) -> Result<(), StorageError> {
        if self.values.write().remove(key).is_some() {
            let _ = self.events.send(StorageEvent {
                key: key.to_string(),
                origin,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// One JSON file per key inside a directory. Writes go through a temporary
/// file and a rename so a crash never leaves a half-written document.
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStorage {
    pub fn new(dir: PathBuf, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            dir,
            quota_bytes,
            events,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_stem: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_stem))
    }

    fn used_bytes_excluding(&self, path: &Path) -> Result<u64, StorageError> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let entry_path = entry.path();
            if entry_path == path || entry_path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            total += entry.metadata()?.len();
        }
        Ok(total)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str, origin: Origin) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if self.quota_bytes.is_some() {
            let needed = self.used_bytes_excluding(&path)? + value.len() as u64;
            check_quota(self.quota_bytes, needed)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        debug!(key = key, bytes = value.len(), "Stored document");

        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            origin,
        });
        Ok(())
    }

    fn remove(&self, key: &str, origin: Origin) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                let _ = self.events.send(StorageEvent {
                    key: key.to_string(),
                    origin,
                });
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
