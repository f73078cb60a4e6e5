//! Append-only JSON-lines storage backend
//!
//! Every change is one line, appended and synced before the call returns:
//!
//! ```text
//! {"event":"revoked","token_hash":"…","revoked_at":"…","reason":"…"}
//! {"event":"device_revoked","device_id":"…","revoked_at":"…","reason":"…"}
//! {"event":"generation","generation":2,"reason":"…","at":"…"}
//! {"event":"issued","token_hash":"…","device_id":"…","jti":"…",…}
//! ```
//!
//! The file is replayed into memory on open. A torn final line (crash mid
//! write) is skipped with a warning; corruption anywhere else is an error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use agetoken_core::{DeviceBinding, TokenHash};

use super::memory::MemoryStore;
use super::{DeviceRevocation, IssuanceRecord, RevocationRecord, RevocationStore, StorageError};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum LogEvent {
    Revoked(RevocationRecord),
    DeviceRevoked(DeviceRevocation),
    Generation {
        generation: u64,
        reason: String,
        at: DateTime<Utc>,
    },
    Issued(IssuanceRecord),
}

/// JSON-lines revocation log
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    index: MemoryStore,
    // Serializes appends and index updates
    file: Mutex<tokio::fs::File>,
}

impl FileStore {
    /// Open (or create) the log at `path` and replay it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let index = MemoryStore::new();
        let (replayed, tail) = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => replay(&path, &contents, &index).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, Tail::Clean),
            Err(e) => return Err(e.into()),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        match tail {
            Tail::Clean => {}
            // Drop the torn line so the next append starts on a fresh line
            Tail::Torn { valid_len } => file.set_len(valid_len).await?,
            Tail::Unterminated => {
                file.write_all(b"\n").await?;
                file.flush().await?;
                file.sync_data().await?;
            }
        }

        info!(path = %path.display(), events = replayed, "Opened revocation log");
        Ok(Self {
            path,
            index,
            file: Mutex::new(file),
        })
    }

    /// Location of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(file: &mut tokio::fs::File, event: &LogEvent) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// State of the end of the log after replay
enum Tail {
    Clean,
    /// Last line parsed but lacks its newline
    Unterminated,
    /// Last line is a partial write; keep only the first `valid_len` bytes
    Torn { valid_len: u64 },
}

async fn replay(path: &Path, contents: &str, index: &MemoryStore) -> Result<(usize, Tail), StorageError> {
    let unterminated = !contents.is_empty() && !contents.ends_with('\n');
    let lines: Vec<&str> = contents.lines().collect();
    let mut applied = 0;
    let mut tail = if unterminated { Tail::Unterminated } else { Tail::Clean };

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: LogEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) if unterminated && i + 1 == lines.len() => {
                warn!(
                    path = %path.display(),
                    line = i + 1,
                    error = %e,
                    "Skipping torn final line in revocation log"
                );
                let valid_len = contents.rfind('\n').map(|n| n + 1).unwrap_or(0);
                tail = Tail::Torn {
                    valid_len: valid_len as u64,
                };
                continue;
            }
            Err(e) => {
                return Err(StorageError::Serialization(format!(
                    "{} line {}: {}",
                    path.display(),
                    i + 1,
                    e
                )))
            }
        };

        match event {
            LogEvent::Revoked(record) => {
                index.revoke(record).await?;
            }
            LogEvent::DeviceRevoked(record) => {
                index.revoke_device(record).await?;
            }
            LogEvent::Generation { generation, reason, .. } => {
                index.store_generation(generation, &reason).await?;
            }
            LogEvent::Issued(record) => index.record_issuance(record).await?,
        }
        applied += 1;
    }
    Ok((applied, tail))
}

#[async_trait]
impl RevocationStore for FileStore {
    async fn revoke(&self, record: RevocationRecord) -> Result<bool, StorageError> {
        let mut file = self.file.lock().await;
        if self.index.get_revocation(&record.token_hash).await?.is_some() {
            return Ok(false);
        }
        Self::append(&mut file, &LogEvent::Revoked(record.clone())).await?;
        self.index.revoke(record).await
    }

    async fn get_revocation(&self, token_hash: &TokenHash) -> Result<Option<RevocationRecord>, StorageError> {
        self.index.get_revocation(token_hash).await
    }

    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError> {
        self.index.list_revocations().await
    }

    async fn revoke_device(&self, record: DeviceRevocation) -> Result<bool, StorageError> {
        let mut file = self.file.lock().await;
        if self.index.is_device_revoked(&record.device_id).await? {
            return Ok(false);
        }
        Self::append(&mut file, &LogEvent::DeviceRevoked(record.clone())).await?;
        self.index.revoke_device(record).await
    }

    async fn is_device_revoked(&self, device_id: &DeviceBinding) -> Result<bool, StorageError> {
        self.index.is_device_revoked(device_id).await
    }

    async fn list_device_revocations(&self) -> Result<Vec<DeviceRevocation>, StorageError> {
        self.index.list_device_revocations().await
    }

    async fn load_generation(&self) -> Result<u64, StorageError> {
        self.index.load_generation().await
    }

    async fn store_generation(&self, generation: u64, reason: &str) -> Result<(), StorageError> {
        let mut file = self.file.lock().await;
        let event = LogEvent::Generation {
            generation,
            reason: reason.to_string(),
            at: Utc::now(),
        };
        Self::append(&mut file, &event).await?;
        self.index.store_generation(generation, reason).await
    }

    async fn record_issuance(&self, record: IssuanceRecord) -> Result<(), StorageError> {
        let mut file = self.file.lock().await;
        Self::append(&mut file, &LogEvent::Issued(record.clone())).await?;
        self.index.record_issuance(record).await
    }

    async fn list_issuances(&self, device_id: &DeviceBinding) -> Result<Vec<IssuanceRecord>, StorageError> {
        self.index.list_issuances(device_id).await
    }
}
