use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::{EncodedPage, Encoder, NativeSearchResult};

/// Scripted encoder for unit tests
#[derive(Debug)]
pub struct StubEncoder {
    pub healthy: bool,
    /// Pages per file name; unknown files fail to encode
    pub documents: HashMap<String, Vec<EncodedPage>>,
    /// Embeddings per query; unknown queries fail to encode
    pub queries: HashMap<String, Vec<f32>>,
    /// `None` makes every native call fail
    pub native_results: Option<Vec<NativeSearchResult>>,
    /// Return every native result regardless of the requested `k`
    pub ignore_k: bool,
    pub calls: Mutex<Vec<String>>,
}

impl Default for StubEncoder {
    fn default() -> Self {
        Self {
            healthy: true,
            documents: HashMap::new(),
            queries: HashMap::new(),
            native_results: None,
            ignore_k: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl StubEncoder {
    pub fn with_document(mut self, file_name: &str, pages: Vec<EncodedPage>) -> Self {
        self.documents.insert(file_name.to_string(), pages);
        self
    }

    pub fn with_query(mut self, query: &str, embedding: Vec<f32>) -> Self {
        self.queries.insert(query.to_string(), embedding);
        self
    }

    pub fn with_native_results(mut self, results: Vec<NativeSearchResult>) -> Self {
        self.native_results = Some(results);
        self
    }

    pub fn ignoring_k(mut self) -> Self {
        self.ignore_k = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

impl Encoder for StubEncoder {
    fn health_check(&self) -> Result<()> {
        self.record("health".to_string());
        if self.healthy {
            Ok(())
        } else {
            Err(anyhow!("encoder is down"))
        }
    }

    fn encode_document(&self, path: &Path) -> Result<Vec<EncodedPage>> {
        let name = file_name(path);
        self.record(format!("encode_document:{}", name));
        self.documents
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("cannot parse {}", name))
    }

    fn encode_query(&self, query: &str) -> Result<Vec<f32>> {
        self.record(format!("encode_query:{}", query));
        self.queries
            .get(query)
            .cloned()
            .ok_or_else(|| anyhow!("cannot encode query"))
    }

    fn index_native(&self, index: &str, path: &Path) -> Result<usize> {
        let name = file_name(path);
        self.record(format!("index_native:{}:{}", index, name));
        self.documents
            .get(&name)
            .map(Vec::len)
            .ok_or_else(|| anyhow!("cannot parse {}", name))
    }

    fn native_search(&self, index: &str, query: &str, k: usize) -> Result<Vec<NativeSearchResult>> {
        self.record(format!("native_search:{}:{}:{}", index, query, k));
        self.native_results
            .as_ref()
            .map(|results| {
                let limit = if self.ignore_k { results.len() } else { k };
                results.iter().take(limit).cloned().collect()
            })
            .ok_or_else(|| anyhow!("native search unavailable"))
    }
}
