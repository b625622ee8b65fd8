//! Persona lookup by stable identifier.
//!
//! A persona lives in two parts: a narrative *document* (who they are, in
//! prose) and a *metadata* map of behavioral anchors (decision style,
//! hesitation triggers, disagreeable weight, …). The directory resolves a
//! persona id to both. In production this sits in front of a document store;
//! [`FileDirectory`] keeps one JSON file per persona, which is all a
//! single-moderator deployment needs.
//!
//! Metadata is stored *flattened*: nested maps become `parent_child` keys and
//! lists become JSON-encoded strings. The prompt assembler knows how to decode
//! that shape, so the flattening is part of the storage contract, not an
//! accident.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A resolved persona: narrative document plus flattened behavioral metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaRecord {
    pub id: String,
    pub document: String,
    pub metadata: Map<String, Value>,
}

/// Errors from persona resolution.
#[derive(Debug)]
pub enum DirectoryError {
    /// No persona stored under the requested id.
    NotFound(String),
    /// The underlying store failed.
    Storage(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::NotFound(id) => write!(f, "persona '{}' not found", id),
            DirectoryError::Storage(msg) => write!(f, "persona store error: {}", msg),
        }
    }
}

impl Error for DirectoryError {}

/// Resolves persona ids to their document and metadata.
#[async_trait]
pub trait PersonaDirectory: Send + Sync {
    /// Fetch a persona. Fails with [`DirectoryError::NotFound`] if absent.
    async fn get(&self, persona_id: &str) -> Result<PersonaRecord, DirectoryError>;

    /// Create or replace a persona. The metadata map is flattened before
    /// storage so nested structures survive the key-value shape.
    async fn upsert(
        &self,
        persona_id: &str,
        document: &str,
        metadata: &Map<String, Value>,
    ) -> Result<(), DirectoryError>;

    /// Remove a persona. Removing an absent id is a no-op.
    async fn delete(&self, persona_id: &str) -> Result<(), DirectoryError>;
}

/// Flatten nested metadata into single-level keys: maps recurse with a `_`
/// joined prefix, lists become JSON-encoded strings, scalars pass through.
pub fn flatten_metadata(meta: &Map<String, Value>, prefix: &str) -> Map<String, Value> {
    let mut flat = Map::new();
    for (k, v) in meta {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{}_{}", prefix, k)
        };
        match v {
            Value::Object(inner) => {
                flat.extend(flatten_metadata(inner, &key));
            }
            Value::Array(_) => {
                flat.insert(key, Value::String(v.to_string()));
            }
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                flat.insert(key, v.clone());
            }
            Value::Null => {
                flat.insert(key, Value::String(String::new()));
            }
        }
    }
    flat
}

/// One-JSON-file-per-persona [`PersonaDirectory`].
pub struct FileDirectory {
    dir: PathBuf,
}

impl FileDirectory {
    /// Open (creating if needed) a directory store rooted at `dir`.
    pub fn new(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(FileDirectory {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, persona_id: &str) -> PathBuf {
        let safe: String = persona_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl PersonaDirectory for FileDirectory {
    async fn get(&self, persona_id: &str) -> Result<PersonaRecord, DirectoryError> {
        let path = self.path_for(persona_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DirectoryError::NotFound(persona_id.to_string()));
            }
            Err(err) => return Err(DirectoryError::Storage(err.to_string())),
        };
        serde_json::from_str(&raw).map_err(|err| DirectoryError::Storage(err.to_string()))
    }

    async fn upsert(
        &self,
        persona_id: &str,
        document: &str,
        metadata: &Map<String, Value>,
    ) -> Result<(), DirectoryError> {
        let record = PersonaRecord {
            id: persona_id.to_string(),
            document: document.to_string(),
            metadata: flatten_metadata(metadata, ""),
        };
        let payload = serde_json::to_string_pretty(&record)
            .map_err(|err| DirectoryError::Storage(err.to_string()))?;
        fs::write(self.path_for(persona_id), payload)
            .map_err(|err| DirectoryError::Storage(err.to_string()))
    }

    async fn delete(&self, persona_id: &str) -> Result<(), DirectoryError> {
        match fs::remove_file(self.path_for(persona_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DirectoryError::Storage(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_handles_nesting_and_lists() {
        let meta = json!({
            "evaluation_framework": { "primary_filter": "value for money" },
            "motivations": ["family", "quality time"],
            "disagreeable": 0.7,
        });
        let flat = flatten_metadata(meta.as_object().unwrap(), "");
        assert_eq!(
            flat.get("evaluation_framework_primary_filter").unwrap(),
            "value for money"
        );
        assert_eq!(
            flat.get("motivations").unwrap().as_str().unwrap(),
            "[\"family\",\"quality time\"]"
        );
        assert_eq!(flat.get("disagreeable").unwrap().as_f64().unwrap(), 0.7);
    }

    #[tokio::test]
    async fn round_trip_and_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileDirectory::new(tmp.path()).unwrap();

        let meta = json!({ "age": 23, "motivations": ["indie games"] });
        dir.upsert("persona_test_1", "A transfer student.", meta.as_object().unwrap())
            .await
            .unwrap();

        let record = dir.get("persona_test_1").await.unwrap();
        assert_eq!(record.document, "A transfer student.");
        assert!(record.metadata.get("motivations").unwrap().is_string());

        match dir.get("missing").await {
            Err(DirectoryError::NotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("expected NotFound, got {:?}", other.map(|r| r.id)),
        }
    }
}
