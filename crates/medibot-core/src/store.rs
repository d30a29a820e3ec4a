//! Vector index abstraction: provisioning, bulk upsert and delete.
//!
//! [`InMemoryStore`] keeps records in process memory; it backs dry runs and tests.
//! The hosted implementation lives in [`crate::pinecone`].

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunks::Chunk;
use crate::retry::Retryable;

/// Similarity metric of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dotproduct,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dotproduct => "dotproduct",
        })
    }
}

/// Everything needed to create an index if it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

/// One chunk with its embedding, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub content: String,
    pub source: Option<String>,
    pub chunk_index: usize,
}

impl VectorRecord {
    /// Pairs a chunk with its vector. The id is derived from source and chunk index,
    /// so ingesting the same document twice overwrites rather than duplicates.
    pub fn from_chunk(chunk: Chunk, values: Vec<f32>) -> Self {
        Self {
            id: record_id(chunk.source.as_deref(), chunk.index),
            values,
            content: chunk.content,
            source: chunk.source,
            chunk_index: chunk.index,
        }
    }
}

pub fn record_id(source: Option<&str>, chunk_index: usize) -> String {
    let name = format!("{}#{}", source.unwrap_or(""), chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the index unless one with that name already exists. Idempotent.
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), StoreError>;

    /// Writes records to the named index; returns how many were stored.
    async fn upsert(&self, index_name: &str, records: &[VectorRecord]) -> Result<usize, StoreError>;

    /// Removes records by id. Ids that are not stored are ignored.
    async fn delete(&self, index_name: &str, ids: &[String]) -> Result<(), StoreError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Index kept in memory. Upserts replace records with the same id and keep
/// first-insertion order otherwise.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
}

#[derive(Debug)]
struct MemoryIndex {
    spec: IndexSpec,
    records: Vec<VectorRecord>,
    /// Record id → position in `records`.
    positions: HashMap<String, usize>,
}

impl MemoryIndex {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn put(&mut self, record: &VectorRecord) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.records[pos] = record.clone(),
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record.clone());
            }
        }
    }

    fn remove(&mut self, ids: &[String]) {
        let before = self.records.len();
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.records.retain(|r| !doomed.contains(r.id.as_str()));
        if self.records.len() != before {
            self.positions = self
                .records
                .iter()
                .enumerate()
                .map(|(pos, r)| (r.id.clone(), pos))
                .collect();
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of an index's records, in insertion order.
    pub fn records(&self, index_name: &str) -> Vec<VectorRecord> {
        self.lock()
            .get(index_name)
            .map(|idx| idx.records.clone())
            .unwrap_or_default()
    }

    pub fn index_spec(&self, index_name: &str) -> Option<IndexSpec> {
        self.lock().get(index_name).map(|idx| idx.spec.clone())
    }

    /// Number of stored records in an index.
    pub fn len(&self, index_name: &str) -> usize {
        self.lock().get(index_name).map_or(0, |idx| idx.records.len())
    }

    pub fn is_empty(&self, index_name: &str) -> bool {
        self.len(index_name) == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryIndex>> {
        // Records are replaced whole, so a poisoned map is still consistent.
        self.indexes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        let mut indexes = self.lock();
        match indexes.get(&spec.name) {
            Some(existing) if existing.spec.dimension != spec.dimension => {
                Err(StoreError::DimensionMismatch {
                    index: spec.name.clone(),
                    existing: existing.spec.dimension,
                    requested: spec.dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                indexes.insert(spec.name.clone(), MemoryIndex::new(spec.clone()));
                Ok(())
            }
        }
    }

    async fn upsert(&self, index_name: &str, records: &[VectorRecord]) -> Result<usize, StoreError> {
        let mut indexes = self.lock();
        let index = indexes
            .get_mut(index_name)
            .ok_or_else(|| StoreError::IndexNotFound(index_name.to_string()))?;
        for record in records {
            if record.values.len() != index.spec.dimension {
                return Err(StoreError::DimensionMismatch {
                    index: index_name.to_string(),
                    existing: index.spec.dimension,
                    requested: record.values.len(),
                });
            }
        }
        for record in records {
            index.put(record);
        }
        Ok(records.len())
    }

    async fn delete(&self, index_name: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut indexes = self.lock();
        let index = indexes
            .get_mut(index_name)
            .ok_or_else(|| StoreError::IndexNotFound(index_name.to_string()))?;
        index.remove(ids);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("index {index} has dimension {existing}, requested {requested}")]
    DimensionMismatch {
        index: String,
        existing: usize,
        requested: usize,
    },
    #[error("index {0} did not become ready in time")]
    NotReady(String),
    #[error("vector store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vector store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::Status { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dimension: usize) -> IndexSpec {
        IndexSpec {
            name: "medi-bot".into(),
            dimension,
            metric: Metric::Cosine,
            cloud: "aws".into(),
            region: "us-east-1".into(),
        }
    }

    fn chunk(source: Option<&str>, index: usize, content: &str) -> Chunk {
        Chunk {
            content: content.into(),
            source: source.map(String::from),
            index,
            start: 0,
        }
    }

    #[test]
    fn record_ids_are_deterministic_and_distinct() {
        assert_eq!(record_id(Some("a.pdf"), 0), record_id(Some("a.pdf"), 0));
        assert_ne!(record_id(Some("a.pdf"), 0), record_id(Some("a.pdf"), 1));
        assert_ne!(record_id(Some("a.pdf"), 0), record_id(Some("b.pdf"), 0));
    }

    #[test]
    fn record_from_chunk_keeps_fields() {
        let r = VectorRecord::from_chunk(chunk(Some("a.pdf"), 2, "text"), vec![0.5; 3]);
        assert_eq!(r.content, "text");
        assert_eq!(r.source.as_deref(), Some("a.pdf"));
        assert_eq!(r.chunk_index, 2);
        assert_eq!(r.id, record_id(Some("a.pdf"), 2));
    }

    #[test]
    fn metric_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Metric::Cosine).unwrap(), "\"cosine\"");
        assert_eq!(Metric::Dotproduct.to_string(), "dotproduct");
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent() {
        let store = InMemoryStore::new();
        store.ensure_index(&spec(3)).await.unwrap();
        store.ensure_index(&spec(3)).await.unwrap();
        assert_eq!(store.index_spec("medi-bot"), Some(spec(3)));
    }

    #[tokio::test]
    async fn ensure_index_rejects_dimension_change() {
        let store = InMemoryStore::new();
        store.ensure_index(&spec(3)).await.unwrap();
        let err = store.ensure_index(&spec(4)).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { existing: 3, requested: 4, .. }));
    }

    #[tokio::test]
    async fn upsert_requires_index() {
        let store = InMemoryStore::new();
        let r = VectorRecord::from_chunk(chunk(None, 0, "x"), vec![0.0; 3]);
        let err = store.upsert("missing", &[r]).await.unwrap_err();
        assert!(matches!(err, StoreError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn upsert_overwrites_same_id_and_keeps_order() {
        let store = InMemoryStore::new();
        store.ensure_index(&spec(2)).await.unwrap();
        let first = vec![
            VectorRecord::from_chunk(chunk(Some("a"), 0, "one"), vec![0.0, 1.0]),
            VectorRecord::from_chunk(chunk(Some("a"), 1, "two"), vec![1.0, 0.0]),
        ];
        store.upsert("medi-bot", &first).await.unwrap();
        let again = vec![VectorRecord::from_chunk(chunk(Some("a"), 0, "uno"), vec![0.5, 0.5])];
        store.upsert("medi-bot", &again).await.unwrap();

        let records = store.records("medi-bot");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "uno");
        assert_eq!(records[1].content, "two");
    }

    #[tokio::test]
    async fn delete_removes_ids_and_later_upserts_still_overwrite() {
        let store = InMemoryStore::new();
        store.ensure_index(&spec(2)).await.unwrap();
        let records: Vec<VectorRecord> = (0..4)
            .map(|i| VectorRecord::from_chunk(chunk(Some("a"), i, &format!("c{i}")), vec![0.0, 1.0]))
            .collect();
        store.upsert("medi-bot", &records).await.unwrap();

        let ids = vec![record_id(Some("a"), 1), "not-stored".to_string()];
        store.delete("medi-bot", &ids).await.unwrap();
        let again = vec![VectorRecord::from_chunk(chunk(Some("a"), 3, "c3'"), vec![1.0, 0.0])];
        store.upsert("medi-bot", &again).await.unwrap();

        let contents: Vec<String> = store.records("medi-bot").into_iter().map(|r| r.content).collect();
        assert_eq!(contents, ["c0", "c2", "c3'"]);
    }

    #[tokio::test]
    async fn delete_requires_index() {
        let store = InMemoryStore::new();
        let err = store.delete("missing", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let store = InMemoryStore::new();
        store.ensure_index(&spec(2)).await.unwrap();
        let r = VectorRecord::from_chunk(chunk(None, 0, "x"), vec![0.0; 3]);
        assert!(store.upsert("medi-bot", &[r]).await.is_err());
        assert!(store.is_empty("medi-bot"));
    }

    #[test]
    fn status_errors_classified() {
        let throttled = StoreError::Status {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        let unavailable = StoreError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        let bad_request = StoreError::Status {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!StoreError::IndexNotFound("x".into()).is_retryable());
    }
}
