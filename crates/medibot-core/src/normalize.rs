//! Reduces page records to the minimal form the chunker needs: text plus source.

use serde::Serialize;
use serde_json::Value;

use crate::pages::RawPage;

/// A page reduced to its text and originating document identifier.
/// Every other piece of loader metadata (page number, totals, ...) is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinimalDoc {
    pub content: String,
    pub source: Option<String>,
}

/// Normalizes pages one-to-one, preserving order. A page without a `source`
/// key (or with a null one) yields `source: None`.
pub fn normalize(pages: Vec<RawPage>) -> Vec<MinimalDoc> {
    pages.into_iter().map(normalize_page).collect()
}

fn normalize_page(page: RawPage) -> MinimalDoc {
    let RawPage { content, mut metadata } = page;
    let source = match metadata.remove("source") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };
    MinimalDoc { content, source }
}
