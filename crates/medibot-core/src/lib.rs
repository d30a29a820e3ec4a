//! All ingestion logic independent of how the pipeline is run.
//!
//! Documents are loaded page by page, reduced to text plus source, split into
//! overlapping chunks, embedded, and upserted into a vector index. Config and the
//! resume checkpoint live in medibot's own app data directory (see [app_data]).

pub mod app_data;
pub mod checkpoint;
pub mod chunks;
pub mod config;
pub mod embed;
pub mod index;
pub mod normalize;
pub mod pages;
pub mod pinecone;
pub mod retry;
pub mod store;

pub use app_data::app_data_dir;
pub use checkpoint::{Checkpoint, CheckpointError};
pub use chunks::{
    default_separators, markdown_separators, Chunk, ChunkConfigError, Separator, SplitterConfig,
    TextSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use config::{
    default_config_path, load_config, save_config, Config, ConfigError, Credentials,
};
pub use embed::{Embedder, EmbedError, OllamaEmbedder, DEFAULT_EMBED_DIMENSION, DEFAULT_EMBED_MODEL};
pub use index::{
    prepare_document, DocumentReport, IndexError, IngestOptions, IngestReport, Ingestor,
    PreparedDocument,
};
pub use normalize::{normalize, MinimalDoc};
pub use pages::{
    canonical_path, discover_documents, AnyLoader, LoadError, PageLoader, PdfLoader, RawPage,
    TextLoader,
};
pub use pinecone::PineconeStore;
pub use retry::RetryPolicy;
pub use store::{
    record_id, IndexSpec, InMemoryStore, Metric, StoreError, VectorRecord, VectorStore,
};
