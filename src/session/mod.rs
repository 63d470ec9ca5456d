// Session module
// Per-session index handles and the registry that owns them


use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::database::sqlite::CACHE_FILE_NAME;
use crate::{DocChatError, Result};

/// Marker written into the index directory of a natively indexed session
pub const NATIVE_MARKER_FILE: &str = "native.index";

/// Handle to an index held by the encoder service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeIndex {
    pub index_name: String,
}

/// Where a session's pages are searched
#[derive(Debug, Clone)]
pub enum IndexBackend {
    DiskCache(EmbeddingCache),
    Native(NativeIndex),
}

impl IndexBackend {
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DiskCache(_) => "disk",
            Self::Native(_) => "native",
        }
    }
}

/// The retrieval index built for one chat session
#[derive(Debug, Clone)]
pub struct SessionIndex {
    pub session_id: String,
    pub backend: IndexBackend,
}

impl SessionIndex {
    #[inline]
    pub fn new(session_id: impl Into<String>, backend: IndexBackend) -> Self {
        Self {
            session_id: session_id.into(),
            backend,
        }
    }

    /// Name of the encoder-side index to search for this session
    #[inline]
    pub fn native_index_name(&self) -> &str {
        match &self.backend {
            IndexBackend::Native(index) => &index.index_name,
            IndexBackend::DiskCache(_) => &self.session_id,
        }
    }
}

/// Session ids become directory names, so only `[A-Za-z0-9_-]` is allowed
#[inline]
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(DocChatError::Session("session id cannot be empty".to_string()));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DocChatError::Session(format!(
            "invalid session id '{}': only letters, digits, '-' and '_' are allowed",
            session_id
        )));
    }
    Ok(())
}

/// Directory layout shared by every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub index_root: PathBuf,
    pub static_root: PathBuf,
    pub uploads_root: PathBuf,
}

impl SessionPaths {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            index_root: config.index_root(),
            static_root: config.static_root(),
            uploads_root: config.uploads_root(),
        }
    }

    #[inline]
    pub fn index_dir(&self, session_id: &str) -> PathBuf {
        self.index_root.join(session_id)
    }

    #[inline]
    pub fn images_dir(&self, session_id: &str) -> PathBuf {
        self.static_root.join("images").join(session_id)
    }

    #[inline]
    pub fn uploads_dir(&self, session_id: &str) -> PathBuf {
        self.uploads_root.join(session_id)
    }
}

/// Open the index stored in `index_dir`, if there is one
async fn open_index_dir(session_id: &str, index_dir: &Path) -> Result<Option<SessionIndex>> {
    if index_dir.join(CACHE_FILE_NAME).is_file() {
        let cache = EmbeddingCache::open(index_dir).await?;
        return Ok(Some(SessionIndex::new(
            session_id,
            IndexBackend::DiskCache(cache),
        )));
    }

    let marker = index_dir.join(NATIVE_MARKER_FILE);
    if marker.is_file() {
        let index_name = tokio::fs::read_to_string(&marker).await?.trim().to_string();
        let index_name = if index_name.is_empty() {
            session_id.to_string()
        } else {
            index_name
        };
        return Ok(Some(SessionIndex::new(
            session_id,
            IndexBackend::Native(NativeIndex { index_name }),
        )));
    }

    Ok(None)
}

async fn remove_dir_if_present(dir: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("Removed {}", dir.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Every open session, keyed by session id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionIndex>,
}

impl SessionRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every session index found under `index_root`.
    ///
    /// Directories with invalid names or without an index are skipped. A
    /// session whose cache cannot be opened is logged and skipped.
    #[inline]
    pub async fn load_existing(index_root: &Path) -> Result<Self> {
        let mut registry = Self::new();

        let mut entries = match tokio::fs::read_dir(index_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(registry),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(session_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_session_id(&session_id).is_err() {
                warn!("Ignoring index directory with invalid name: {}", session_id);
                continue;
            }

            match open_index_dir(&session_id, &entry.path()).await {
                Ok(Some(index)) => {
                    debug!("Loaded {} session {}", index.backend.kind(), session_id);
                    registry.insert(index);
                }
                Ok(None) => debug!("No index in {}", entry.path().display()),
                Err(e) => warn!("Failed to load session {}: {}", session_id, e),
            }
        }

        info!("Loaded {} existing sessions", registry.len());
        Ok(registry)
    }

    /// Open a single session under `index_root` without touching any other.
    ///
    /// Returns `None` when the session has no index on disk.
    #[inline]
    pub async fn open_session(index_root: &Path, session_id: &str) -> Result<Option<SessionIndex>> {
        validate_session_id(session_id)?;
        open_index_dir(session_id, &index_root.join(session_id)).await
    }

    /// Register an index, returning the one it replaced
    #[inline]
    pub fn insert(&mut self, index: SessionIndex) -> Option<SessionIndex> {
        self.sessions.insert(index.session_id.clone(), index)
    }

    #[inline]
    pub fn get(&self, session_id: &str) -> Option<&SessionIndex> {
        self.sessions.get(session_id)
    }

    #[inline]
    pub fn remove(&mut self, session_id: &str) -> Option<SessionIndex> {
        self.sessions.remove(session_id)
    }

    #[inline]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Session ids in sorted order
    #[inline]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop a session's handle and delete its index, images and uploads.
    ///
    /// Returns whether anything existed to delete.
    #[inline]
    pub async fn delete_session(&mut self, session_id: &str, paths: &SessionPaths) -> Result<bool> {
        validate_session_id(session_id)?;

        let mut removed = false;
        if let Some(index) = self.remove(session_id) {
            if let IndexBackend::DiskCache(cache) = &index.backend {
                cache.close().await;
            }
            removed = true;
        }
        for dir in [
            paths.index_dir(session_id),
            paths.images_dir(session_id),
            paths.uploads_dir(session_id),
        ] {
            removed |= remove_dir_if_present(&dir).await?;
        }

        if removed {
            info!("Deleted session {}", session_id);
        } else {
            warn!("Session {} does not exist", session_id);
        }
        Ok(removed)
    }
}
