// Result materialization module
// Writes retrieved page images as content-addressed PNG files


use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::encoder::NativeSearchResult;
use crate::search::SearchResult;
use crate::session::validate_session_id;
use crate::{DocChatError, Result};

/// A retrieved page from either search path
#[derive(Debug, Clone)]
pub enum RetrievedPage {
    Cached(SearchResult),
    Native(NativeSearchResult),
}

impl RetrievedPage {
    fn label(&self) -> String {
        match self {
            Self::Cached(result) => result.key.to_string(),
            Self::Native(result) => format!("{}_{}", result.doc_id, result.page_num),
        }
    }

    fn image_bytes(&self) -> std::result::Result<Vec<u8>, String> {
        match self {
            Self::Cached(result) => Ok(result.image.clone()),
            Self::Native(result) => {
                let payload = result
                    .base64
                    .as_deref()
                    .ok_or_else(|| "no image payload".to_string())?;
                STANDARD
                    .decode(payload.as_bytes())
                    .map_err(|e| format!("invalid base64 image: {}", e))
            }
        }
    }
}

/// A page image written to disk, addressed by its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedImage {
    pub content_hash: String,
    pub relative_path: String,
}

#[derive(Debug, Clone)]
pub struct Materializer {
    static_root: PathBuf,
}

#[inline]
pub fn image_file_name(content_hash: &str) -> String {
    format!("retrieved_{}.png", content_hash)
}

impl Materializer {
    #[inline]
    pub fn new(static_root: impl Into<PathBuf>) -> Self {
        Self {
            static_root: static_root.into(),
        }
    }

    #[inline]
    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    /// Directory holding a session's materialized images
    #[inline]
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.static_root.join("images").join(session_id)
    }

    /// Write each usable page as a PNG and return its path relative to the
    /// static root, in input order.
    ///
    /// Pages without decodable image data are logged and dropped. Only an
    /// invalid session id or an unusable session directory fails the batch.
    #[inline]
    pub fn materialize(&self, pages: &[RetrievedPage], session_id: &str) -> Result<Vec<String>> {
        validate_session_id(session_id)?;

        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).map_err(|e| {
            DocChatError::Materialize(format!(
                "failed to create image directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::with_capacity(pages.len());
        for page in pages {
            let label = page.label();
            let bytes = match page.image_bytes() {
                Ok(bytes) => bytes,
                Err(reason) => {
                    warn!("Skipping retrieved page {}: {}", label, reason);
                    continue;
                }
            };

            match self.write_image(&dir, session_id, &bytes) {
                Ok(image) => {
                    debug!("Materialized {} as {}", label, image.relative_path);
                    paths.push(image.relative_path);
                }
                Err(reason) => warn!("Skipping retrieved page {}: {}", label, reason),
            }
        }

        Ok(paths)
    }

    /// Validate, hash and persist one image
    fn write_image(
        &self,
        dir: &Path,
        session_id: &str,
        bytes: &[u8],
    ) -> std::result::Result<MaterializedImage, String> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| format!("undecodable image: {}", e))?;

        let content_hash = blake3::hash(bytes).to_hex().to_string();
        let file_name = image_file_name(&content_hash);
        let target = dir.join(&file_name);

        if target.exists() {
            debug!("{} already materialized", file_name);
        } else {
            persist_png(dir, &target, &decoded)
                .map_err(|e| format!("failed to write {}: {}", target.display(), e))?;
        }

        Ok(MaterializedImage {
            content_hash,
            relative_path: format!("images/{}/{}", session_id, file_name),
        })
    }

    /// Remove every materialized image of a session
    #[inline]
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        match fs::remove_dir_all(self.session_dir(session_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Encode into a temporary sibling, then move it into place without
/// replacing a file another writer already finished.
fn persist_png(dir: &Path, target: &Path, image: &image::DynamicImage) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(io::Error::other)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!("{} written concurrently, keeping existing file", target.display());
            Ok(())
        }
        Err(e) => Err(e.error),
    }
}
