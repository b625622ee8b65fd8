//! Per-participant conversational memory.
//!
//! Every participant owns a history key; the exchanges appended under that key
//! are what lets a persona "remember" earlier turns across room commands and
//! across process restarts. The store is the single shared mutable resource in
//! the system, logically partitioned per key. There are no concurrent writers
//! to the same key, so no locking or transaction layer is needed.
//!
//! [`FileHistoryStore`] persists one JSON file per key with a save timestamp
//! and TTL; an expired file reads back as an empty history, mirroring a
//! key-value store with expiry. [`MemoryHistoryStore`] backs tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Who spoke in one stored exchange turn. Serialized as `user`/`assistant`
/// to stay compatible with histories written by earlier deployments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRole {
    #[serde(rename = "user")]
    Moderator,
    #[serde(rename = "assistant")]
    Participant,
}

/// One turn of a participant's stored history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryTurn {
    pub fn moderator(content: impl Into<String>) -> Self {
        HistoryTurn {
            role: HistoryRole::Moderator,
            content: content.into(),
        }
    }

    pub fn is_moderator(&self) -> bool {
        self.role == HistoryRole::Moderator
    }

    pub fn participant(content: impl Into<String>) -> Self {
        HistoryTurn {
            role: HistoryRole::Participant,
            content: content.into(),
        }
    }
}

/// Append-only per-key message log with expiry.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the full history for a key. Absent or expired keys read as empty.
    async fn load(&self, key: &str) -> Result<Vec<HistoryTurn>, Box<dyn Error>>;

    /// Replace the history for a key, refreshing its expiry.
    async fn save(&self, key: &str, turns: &[HistoryTurn]) -> Result<(), Box<dyn Error>>;

    /// Append one moderator/participant exchange. Equivalent to load + push +
    /// push + save, and the only mutation the turn engine performs.
    async fn append(
        &self,
        key: &str,
        moderator_text: &str,
        participant_text: &str,
    ) -> Result<(), Box<dyn Error>> {
        let mut turns = self.load(key).await?;
        turns.push(HistoryTurn::moderator(moderator_text));
        turns.push(HistoryTurn::participant(participant_text));
        self.save(key, &turns).await
    }

    /// Remove the history for a key entirely (`!reset`).
    async fn delete(&self, key: &str) -> Result<(), Box<dyn Error>>;
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    saved_at: DateTime<Utc>,
    ttl_secs: u64,
    turns: Vec<HistoryTurn>,
}

impl HistoryFile {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.saved_at + chrono::Duration::seconds(self.ttl_secs as i64) < now
    }
}

/// Keys contain characters like `:` that filesystems dislike.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File-backed [`HistoryStore`]: one JSON document per key under a directory,
/// carrying its own save timestamp and TTL.
pub struct FileHistoryStore {
    dir: PathBuf,
    ttl_secs: u64,
}

impl FileHistoryStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: &Path, ttl_secs: u64) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(FileHistoryStore {
            dir: dir.to_path_buf(),
            ttl_secs,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self, key: &str) -> Result<Vec<HistoryTurn>, Box<dyn Error>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let file: HistoryFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                // A corrupt history file should not take the session down.
                log::warn!("FileHistoryStore::load({}): unreadable file: {}", key, err);
                return Ok(Vec::new());
            }
        };
        if file.is_expired(Utc::now()) {
            let _ = fs::remove_file(&path);
            return Ok(Vec::new());
        }
        Ok(file.turns)
    }

    async fn save(&self, key: &str, turns: &[HistoryTurn]) -> Result<(), Box<dyn Error>> {
        let file = HistoryFile {
            saved_at: Utc::now(),
            ttl_secs: self.ttl_secs,
            turns: turns.to_vec(),
        };
        let payload = serde_json::to_string(&file)?;
        fs::write(self.path_for(key), payload)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Box<dyn Error>> {
        let path = self.path_for(key);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory [`HistoryStore`] used by tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<String, Vec<HistoryTurn>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, key: &str) -> Result<Vec<HistoryTurn>, Box<dyn Error>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, turns: &[HistoryTurn]) -> Result<(), Box<dyn Error>> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), turns.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Box<dyn Error>> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_preserves_order() {
        let store = MemoryHistoryStore::new();
        store.append("k", "q1", "a1").await.unwrap();
        store.append("k", "q2", "a2").await.unwrap();

        let turns = store.load("k").await.unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], HistoryTurn::moderator("q1"));
        assert_eq!(turns[1], HistoryTurn::participant("a1"));
        assert_eq!(turns[3], HistoryTurn::participant("a2"));
    }

    #[tokio::test]
    async fn missing_key_loads_empty() {
        let store = MemoryHistoryStore::new();
        assert!(store.load("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = FileHistoryStore::new(tmp.path(), 3600).unwrap();
            store.append("session:lena:messages", "q", "a").await.unwrap();
        }
        let reopened = FileHistoryStore::new(tmp.path(), 3600).unwrap();
        let turns = reopened.load("session:lena:messages").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1], HistoryTurn::participant("a"));
    }

    #[tokio::test]
    async fn expired_file_reads_as_empty_and_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(tmp.path(), 1).unwrap();
        let stale = HistoryFile {
            saved_at: Utc::now() - chrono::Duration::seconds(10),
            ttl_secs: 1,
            turns: vec![HistoryTurn::moderator("old")],
        };
        let path = store.path_for("k");
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(store.load("k").await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(tmp.path(), 3600).unwrap();
        std::fs::write(store.path_for("k"), "not json").unwrap();
        assert!(store.load("k").await.unwrap().is_empty());
    }

    #[test]
    fn wire_format_is_user_assistant() {
        let turn = HistoryTurn::moderator("hi");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"user\""));
        let back: HistoryTurn = serde_json::from_str("{\"role\":\"assistant\",\"content\":\"x\"}").unwrap();
        assert_eq!(back.role, HistoryRole::Participant);
    }
}
