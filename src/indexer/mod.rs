// Indexer module
// Converts uploaded documents and writes encoded pages into a session index


use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntryKey, EmbeddingCache};
use crate::config::{Config, StorageMode};
use crate::converter::{
    ConversionReport, DocumentConverter, PdfOnlyConverter, SofficeConverter, is_pdf, list_files,
};
use crate::encoder::{Encoder, HttpEncoder};
use crate::session::{
    IndexBackend, NATIVE_MARKER_FILE, NativeIndex, SessionIndex, validate_session_id,
};
use crate::{DocChatError, Result};

/// Counts from one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub pages_indexed: usize,
    pub conversion: ConversionReport,
}

/// Builds session indexes from folders of uploaded documents
pub struct Indexer {
    encoder: Arc<dyn Encoder>,
    converter: Arc<dyn DocumentConverter>,
    index_root: PathBuf,
    storage: StorageMode,
    show_progress: bool,
}

impl Indexer {
    #[inline]
    pub fn new(
        encoder: Arc<dyn Encoder>,
        converter: Arc<dyn DocumentConverter>,
        index_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            encoder,
            converter,
            index_root: index_root.into(),
            storage: StorageMode::Disk,
            show_progress: false,
        }
    }

    /// Indexer using the configured HTTP encoder and converter
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let encoder = HttpEncoder::new(config)
            .map_err(|e| DocChatError::Encoder(format!("{:#}", e)))?;
        let converter: Arc<dyn DocumentConverter> = if config.converter.enabled {
            Arc::new(SofficeConverter::new(config.converter.command.clone()))
        } else {
            Arc::new(PdfOnlyConverter)
        };

        Ok(Self::new(Arc::new(encoder), converter, config.index_root())
            .with_storage_mode(config.retrieval.storage))
    }

    #[inline]
    pub fn with_storage_mode(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    /// Draw a progress bar on an attended terminal
    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[inline]
    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    #[inline]
    pub fn index_dir(&self, index_id: &str) -> PathBuf {
        self.index_root.join(index_id)
    }

    /// Index every PDF in `folder` into the session index `index_id`.
    ///
    /// Office documents are converted first. A document the encoder cannot
    /// process is logged and counted, never fatal. An unreachable encoder or an
    /// index that cannot be opened aborts the run.
    #[inline]
    pub async fn index_folder(
        &self,
        folder: &Path,
        index_id: &str,
    ) -> Result<(SessionIndex, IndexingStats)> {
        validate_session_id(index_id)?;
        info!("Indexing {} into session {}", folder.display(), index_id);

        let mut stats = IndexingStats {
            conversion: self.convert(folder).await?,
            ..IndexingStats::default()
        };

        let encoder = Arc::clone(&self.encoder);
        tokio::task::spawn_blocking(move || encoder.health_check())
            .await
            .map_err(|e| DocChatError::Indexing(format!("health check task failed: {}", e)))?
            .map_err(|e| {
                DocChatError::Indexing(format!("encoder is not available: {:#}", e))
            })?;

        let documents: Vec<PathBuf> = list_files(folder)
            .map_err(|e| DocChatError::Indexing(format!("{:#}", e)))?
            .into_iter()
            .filter(|p| is_pdf(p))
            .collect();
        debug!("Found {} PDF documents", documents.len());

        let index_dir = self.index_dir(index_id);
        let backend = match self.storage {
            StorageMode::Disk => {
                let cache = EmbeddingCache::open(&index_dir).await.map_err(|e| {
                    DocChatError::Indexing(format!(
                        "failed to open index {}: {}",
                        index_dir.display(),
                        e
                    ))
                })?;
                IndexBackend::DiskCache(cache)
            }
            StorageMode::Native => {
                write_native_marker(&index_dir, index_id).await?;
                IndexBackend::Native(NativeIndex {
                    index_name: index_id.to_string(),
                })
            }
        };

        let bar = self.progress_bar(documents.len());
        for document in &documents {
            let file_name = document
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            bar.set_message(file_name.clone());

            let outcome = match &backend {
                IndexBackend::DiskCache(cache) => {
                    self.index_document(cache, document, &file_name).await
                }
                IndexBackend::Native(index) => {
                    self.index_document_native(&index.index_name, document).await
                }
            };

            match outcome {
                Ok(pages) => {
                    info!("Indexed {} pages from {}", pages, file_name);
                    stats.documents_indexed += 1;
                    stats.pages_indexed += pages;
                }
                Err(DocChatError::Cache(e)) => {
                    bar.finish_and_clear();
                    error!("Index store failed while writing {}: {}", file_name, e);
                    return Err(DocChatError::Indexing(format!(
                        "failed to write pages of {}: {}",
                        file_name, e
                    )));
                }
                Err(e) => {
                    warn!("Skipping {}: {}", file_name, e);
                    stats.documents_failed += 1;
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            "Session {}: {} documents indexed, {} failed, {} pages",
            index_id, stats.documents_indexed, stats.documents_failed, stats.pages_indexed
        );

        Ok((SessionIndex::new(index_id, backend), stats))
    }

    async fn convert(&self, folder: &Path) -> Result<ConversionReport> {
        let converter = Arc::clone(&self.converter);
        let folder_owned = folder.to_path_buf();
        let report = tokio::task::spawn_blocking(move || converter.convert_folder(&folder_owned))
            .await
            .map_err(|e| DocChatError::Indexing(format!("conversion task failed: {}", e)))?
            .map_err(|e| DocChatError::Indexing(format!("{:#}", e)))?;

        for (path, reason) in &report.failed {
            warn!("Could not convert {}: {}", path.display(), reason);
        }
        Ok(report)
    }

    async fn index_document(
        &self,
        cache: &EmbeddingCache,
        document: &Path,
        file_name: &str,
    ) -> Result<usize> {
        let encoder = Arc::clone(&self.encoder);
        let path = document.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || encoder.encode_document(&path))
            .await
            .map_err(|e| DocChatError::Encoder(format!("encoding task failed: {}", e)))?
            .map_err(|e| DocChatError::Encoder(format!("{:#}", e)))?;

        for (page_index, page) in pages.iter().enumerate() {
            let key = CacheEntryKey::new(file_name, page_index);
            cache.store_page(&key, &page.image, &page.embedding).await?;
        }
        Ok(pages.len())
    }

    async fn index_document_native(&self, index_name: &str, document: &Path) -> Result<usize> {
        let encoder = Arc::clone(&self.encoder);
        let path = document.to_path_buf();
        let index_name = index_name.to_string();
        tokio::task::spawn_blocking(move || encoder.index_native(&index_name, &path))
            .await
            .map_err(|e| DocChatError::Encoder(format!("indexing task failed: {}", e)))?
            .map_err(|e| DocChatError::Encoder(format!("{:#}", e)))
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress || !console::user_attended_stderr() {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        match ProgressStyle::with_template("{spinner} [{pos}/{len}] Indexing {msg}") {
            Ok(style) => bar.with_style(style),
            Err(_) => bar,
        }
    }
}

async fn write_native_marker(index_dir: &Path, index_name: &str) -> Result<()> {
    tokio::fs::create_dir_all(index_dir).await.map_err(|e| {
        DocChatError::Indexing(format!(
            "failed to create index directory {}: {}",
            index_dir.display(),
            e
        ))
    })?;
    tokio::fs::write(index_dir.join(NATIVE_MARKER_FILE), index_name)
        .await
        .map_err(|e| DocChatError::Indexing(format!("failed to record native index: {}", e)))
}
