//! Loading source documents into page records.
//!
//! A loader turns one file into an ordered list of [`RawPage`]s, one per page, in
//! document order. PDFs are parsed with lopdf; plain text and markdown files load
//! as a single page. Loaders never retry: any failure is returned to the caller.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use walkdir::WalkDir;

/// Default maximum file size accepted by the loaders: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// One page of extracted document text plus whatever metadata the extractor produced.
/// Always carries a `source` key; PDF pages also carry `page` (0-based) and `total_pages`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl RawPage {
    pub fn new(content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Turns a file on disk into page records.
pub trait PageLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<RawPage>, LoadError>;

    fn supported_extensions(&self) -> &[&str];

    fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.supported_extensions().contains(&ext.as_str()))
    }
}

/// PDF loader: one page record per PDF page.
#[derive(Debug, Clone)]
pub struct PdfLoader {
    pub max_file_size: u64,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl PageLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<Vec<RawPage>, LoadError> {
        let bytes = read_bounded(path, self.max_file_size)?;
        let doc = lopdf::Document::load_mem(&bytes).map_err(|e| LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("not a readable PDF: {e}"),
        })?;

        let source = path.display().to_string();
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let total = page_numbers.len();
        let mut pages = Vec::with_capacity(total);
        for (i, number) in page_numbers.into_iter().enumerate() {
            let content = match doc.extract_text(&[number]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(source = %source, page = i, "no extractable text: {e}");
                    String::new()
                }
            };
            let mut metadata = Map::new();
            metadata.insert("source".into(), Value::String(source.clone()));
            metadata.insert("page".into(), Value::from(i));
            metadata.insert("total_pages".into(), Value::from(total));
            pages.push(RawPage::new(content, metadata));
        }
        tracing::debug!(source = %source, pages = pages.len(), "loaded PDF");
        Ok(pages)
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf"]
    }
}

/// Plain text / markdown loader: the whole file is a single page.
#[derive(Debug, Clone)]
pub struct TextLoader {
    pub max_file_size: u64,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl PageLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Vec<RawPage>, LoadError> {
        let bytes = read_bounded(path, self.max_file_size)?;
        let content = String::from_utf8(bytes).map_err(|e| LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("not valid UTF-8 text: {e}"),
        })?;
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::String(path.display().to_string()));
        Ok(vec![RawPage::new(content, metadata)])
    }

    fn supported_extensions(&self) -> &[&str] {
        &["txt", "md", "markdown"]
    }
}

/// Picks the PDF or text loader by file extension.
#[derive(Debug, Clone, Default)]
pub struct AnyLoader {
    pdf: PdfLoader,
    text: TextLoader,
}

impl AnyLoader {
    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self {
            pdf: PdfLoader { max_file_size },
            text: TextLoader { max_file_size },
        }
    }
}

impl PageLoader for AnyLoader {
    fn load(&self, path: &Path) -> Result<Vec<RawPage>, LoadError> {
        if self.pdf.supports(path) {
            self.pdf.load(path)
        } else if self.text.supports(path) {
            self.text.load(path)
        } else {
            Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "unrecognized file extension".into(),
            })
        }
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf", "txt", "md", "markdown"]
    }
}

/// Expands an input path into the documents to ingest.
/// A file is returned as-is (the loader decides whether it can read it); a directory
/// is walked for files the loader supports, skipping hidden entries, in sorted order.
/// Returned paths are canonical, so a file keeps one source however it was named.
pub fn discover_documents(root: &Path, loader: &dyn PageLoader) -> Result<Vec<PathBuf>, LoadError> {
    let root = canonical_path(root)?;
    let meta = std::fs::metadata(&root).map_err(|e| LoadError::SourceUnreadable {
        path: root.clone(),
        source: e,
    })?;
    if !meta.is_dir() {
        return Ok(vec![root]);
    }
    let root = root.as_path();
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| LoadError::SourceUnreadable {
            path: e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && loader.supports(path) {
            found.push(path.to_path_buf());
        }
    }
    Ok(found)
}

/// Absolute path with `.`/`..` and symlinks resolved.
pub fn canonical_path(path: &Path) -> Result<PathBuf, LoadError> {
    std::fs::canonicalize(path).map_err(|e| LoadError::SourceUnreadable {
        path: path.to_path_buf(),
        source: e,
    })
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn read_bounded(path: &Path, max_size: u64) -> Result<Vec<u8>, LoadError> {
    let unreadable = |e| LoadError::SourceUnreadable {
        path: path.to_path_buf(),
        source: e,
    };
    let meta = std::fs::metadata(path).map_err(unreadable)?;
    if !meta.is_file() {
        return Err(LoadError::SourceUnreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    if meta.len() > max_size {
        return Err(LoadError::TooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            limit: max_size,
        });
    }
    std::fs::read(path).map_err(unreadable)
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported format for {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },
    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
}
