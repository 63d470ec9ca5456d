// Encoder module
// Interface to the external multimodal page encoder

pub mod http;
#[cfg(test)]
pub mod testing;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use http::HttpEncoder;

/// One rendered document page with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPage {
    pub image: Vec<u8>,
    pub embedding: Vec<f32>,
}

/// A page returned by the encoder's own search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeSearchResult {
    pub doc_id: String,
    pub page_num: usize,
    pub score: f32,
    /// Base64-encoded page image, when the index stores page images
    #[serde(default)]
    pub base64: Option<String>,
}

/// A multimodal encoder that renders document pages to images and embeds
/// pages and queries into a shared vector space.
///
/// Calls block the current thread.
pub trait Encoder: Send + Sync {
    /// Verify the encoder is reachable and its model is loaded
    fn health_check(&self) -> Result<()>;

    /// Render every page of a document and embed each page
    fn encode_document(&self, path: &Path) -> Result<Vec<EncodedPage>>;

    /// Embed a natural-language query
    fn encode_query(&self, query: &str) -> Result<Vec<f32>>;

    /// Add a document to the encoder's own index named `index`, returning the page count
    fn index_native(&self, index: &str, path: &Path) -> Result<usize>;

    /// Top-`k` search against the encoder's own index named `index`
    fn native_search(&self, index: &str, query: &str, k: usize)
    -> Result<Vec<NativeSearchResult>>;
}
