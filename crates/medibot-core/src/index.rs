//! Ingestion pipeline: load → normalize → chunk → embed → upsert into the vector index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::chunks::{Chunk, TextSplitter};
use crate::config::Config;
use crate::embed::{check_vectors, EmbedError, Embedder};
use crate::normalize::normalize;
use crate::pages::{canonical_path, discover_documents, LoadError, PageLoader};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{record_id, IndexSpec, StoreError, VectorRecord, VectorStore};

/// Batch sizes, parallelism and retry behaviour of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub upsert_batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            embed_batch_size: 32,
            embed_concurrency: 4,
            upsert_batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embed_batch_size: config.embedding.batch_size,
            embed_concurrency: config.embedding.concurrency,
            upsert_batch_size: config.index.upsert_batch_size,
            retry: config.retry.policy(),
        }
    }
}

/// Pages and chunks of one document, before any remote call.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub source: String,
    pub pages: usize,
    pub chunks: Vec<Chunk>,
}

/// Loads, normalizes and chunks one document. Purely local.
pub fn prepare_document(
    loader: &dyn PageLoader,
    splitter: &TextSplitter,
    path: &Path,
) -> Result<PreparedDocument, LoadError> {
    let pages = loader.load(path)?;
    let page_count = pages.len();
    let docs = normalize(pages);
    let chunks = splitter.chunk_docs(&docs);
    Ok(PreparedDocument {
        source: path.display().to_string(),
        pages: page_count,
        chunks,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentReport {
    pub source: String,
    pub pages: usize,
    pub chunks: usize,
    pub upserted: usize,
    /// Records left over from a longer earlier version of the document.
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    /// Documents skipped because the checkpoint already had them.
    pub skipped: usize,
    pub pages: usize,
    pub chunks: usize,
    pub upserted: usize,
    pub deleted: usize,
}

/// Runs the pipeline against explicitly supplied collaborators.
pub struct Ingestor {
    loader: Arc<dyn PageLoader>,
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    index: IndexSpec,
    options: IngestOptions,
}

impl Ingestor {
    /// Fails if the embedder's vectors would not fit the index.
    pub fn new(
        loader: Arc<dyn PageLoader>,
        splitter: TextSplitter,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        index: IndexSpec,
        options: IngestOptions,
    ) -> Result<Self, IndexError> {
        if embedder.dimension() != index.dimension {
            return Err(IndexError::DimensionMismatch {
                embedder: embedder.dimension(),
                index: index.dimension,
            });
        }
        Ok(Self {
            loader,
            splitter,
            embedder,
            store,
            index,
            options: IngestOptions {
                embed_batch_size: options.embed_batch_size.max(1),
                embed_concurrency: options.embed_concurrency.max(1),
                upsert_batch_size: options.upsert_batch_size.max(1),
                retry: options.retry,
            },
        })
    }

    pub fn index(&self) -> &IndexSpec {
        &self.index
    }

    /// Creates the index if it does not exist yet. Safe to run repeatedly.
    pub async fn provision(&self) -> Result<(), IndexError> {
        tracing::info!(
            index = %self.index.name,
            store = self.store.name(),
            "ensuring index exists"
        );
        let what = format!("{} provisioning of {}", self.store.name(), self.index.name);
        with_retry(self.options.retry, &what, || {
            self.store.ensure_index(&self.index)
        })
        .await?;
        Ok(())
    }

    /// Ingests every document under `inputs` (files, or directories to walk) in order.
    /// With a checkpoint, documents it already lists are skipped, each finished
    /// document is recorded, and records a document no longer produces are deleted.
    pub async fn ingest(
        &self,
        inputs: &[PathBuf],
        mut checkpoint: Option<&mut Checkpoint>,
    ) -> Result<IngestReport, IndexError> {
        let mut report = IngestReport::default();
        for input in inputs {
            for path in discover_documents(input, self.loader.as_ref())? {
                let source = path.display().to_string();
                if checkpoint.as_ref().is_some_and(|cp| cp.is_done(&source)) {
                    tracing::info!(source = %source, "already ingested, skipping");
                    report.skipped += 1;
                    continue;
                }
                let previous = checkpoint.as_ref().and_then(|cp| cp.stored_chunks(&source));
                let doc = self.replace_document(&path, previous).await?;
                if let Some(cp) = checkpoint.as_deref_mut() {
                    cp.mark_done(&doc.source, doc.chunks)?;
                }
                report.documents += 1;
                report.pages += doc.pages;
                report.chunks += doc.chunks;
                report.upserted += doc.upserted;
                report.deleted += doc.deleted;
            }
        }
        Ok(report)
    }

    /// Runs one document through the whole pipeline.
    pub async fn ingest_document(&self, path: &Path) -> Result<DocumentReport, IndexError> {
        self.replace_document(path, None).await
    }

    /// Like [`Ingestor::ingest_document`], for a document that earlier left
    /// `previous_chunks` records in the index. Records past the new chunk count are
    /// deleted once the upsert succeeds.
    pub async fn replace_document(
        &self,
        path: &Path,
        previous_chunks: Option<usize>,
    ) -> Result<DocumentReport, IndexError> {
        let prepared = self.prepare(path).await?;
        tracing::info!(
            source = %prepared.source,
            pages = prepared.pages,
            chunks = prepared.chunks.len(),
            "document prepared"
        );
        let chunk_count = prepared.chunks.len();
        let upserted = if prepared.chunks.is_empty() {
            0
        } else {
            let vectors = self.embed_chunks(&prepared.chunks).await?;
            let records: Vec<VectorRecord> = prepared
                .chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, values)| VectorRecord::from_chunk(chunk, values))
                .collect();
            let upserted = self.upsert(&records).await?;
            tracing::info!(source = %prepared.source, upserted, "document stored");
            upserted
        };

        let stale: Vec<String> = (chunk_count..previous_chunks.unwrap_or(0))
            .map(|i| record_id(Some(prepared.source.as_str()), i))
            .collect();
        if !stale.is_empty() {
            self.delete(&stale).await?;
            tracing::info!(source = %prepared.source, deleted = stale.len(), "removed stale records");
        }

        Ok(DocumentReport {
            source: prepared.source,
            pages: prepared.pages,
            chunks: chunk_count,
            upserted,
            deleted: stale.len(),
        })
    }

    /// Load/normalize/chunk on the blocking pool; PDF parsing is CPU-bound.
    /// The path is canonicalized first so the document's source does not depend on
    /// how it was named.
    async fn prepare(&self, path: &Path) -> Result<PreparedDocument, IndexError> {
        let loader = Arc::clone(&self.loader);
        let splitter = self.splitter.clone();
        let path = path.to_path_buf();
        let prepared = tokio::task::spawn_blocking(move || {
            let path = canonical_path(&path)?;
            prepare_document(loader.as_ref(), &splitter, &path)
        })
        .await??;
        Ok(prepared)
    }

    /// Embeds chunk texts in batches, several batches in flight, results in chunk order.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, IndexError> {
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.options.embed_batch_size)
            .map(|batch| batch.iter().map(|c| c.content.clone()).collect())
            .collect();
        let total = batches.len();
        let retry = self.options.retry;
        let dimension = self.embedder.dimension();

        let embedded: Vec<Vec<Vec<f32>>> = stream::iter(batches.iter().enumerate())
            .map(|(i, texts)| async move {
                tracing::debug!(batch = i + 1, of = total, size = texts.len(), "embedding batch");
                let what = format!("{} embedding batch {}/{}", self.embedder.name(), i + 1, total);
                let vectors = with_retry(retry, &what, || self.embedder.embed_batch(texts)).await?;
                check_vectors(&vectors, texts.len(), dimension)?;
                Ok::<_, EmbedError>(vectors)
            })
            .buffered(self.options.embed_concurrency)
            .try_collect()
            .await?;
        Ok(embedded.into_iter().flatten().collect())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, IndexError> {
        let mut upserted = 0;
        for (i, batch) in records.chunks(self.options.upsert_batch_size).enumerate() {
            let what = format!("{} upsert batch {}", self.store.name(), i + 1);
            upserted += with_retry(self.options.retry, &what, || {
                self.store.upsert(&self.index.name, batch)
            })
            .await?;
        }
        Ok(upserted)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        for (i, batch) in ids.chunks(self.options.upsert_batch_size).enumerate() {
            let what = format!("{} delete batch {}", self.store.name(), i + 1);
            with_retry(self.options.retry, &what, || {
                self.store.delete(&self.index.name, batch)
            })
            .await?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("vector store error: {0}")]
    Store(#[from] StoreError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("embedder produces {embedder}-dimensional vectors but the index expects {index}")]
    DimensionMismatch { embedder: usize, index: usize },
    #[error("document task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
