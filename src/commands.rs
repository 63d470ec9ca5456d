use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, StorageMode};
use crate::encoder::{Encoder, HttpEncoder};
use crate::indexer::Indexer;
use crate::materialize::Materializer;
use crate::retrieval::Retriever;
use crate::sections::{expand_answer, load_sections};
use crate::session::{IndexBackend, SessionPaths, SessionRegistry, validate_session_id};

/// Copy `files` into `uploads_dir`, keeping only each file's final name
/// component. Returns the copied paths.
#[inline]
pub fn copy_uploads(files: &[PathBuf], uploads_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(uploads_dir).with_context(|| {
        format!(
            "Failed to create upload folder: {}",
            uploads_dir.display()
        )
    })?;

    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let file_name = file
            .file_name()
            .with_context(|| format!("Not a file: {}", file.display()))?;
        let target = uploads_dir.join(file_name);
        fs::copy(file, &target).with_context(|| {
            format!("Failed to copy {} to {}", file.display(), target.display())
        })?;
        copied.push(target);
    }
    Ok(copied)
}

/// Upload documents into a session and index them
#[inline]
pub async fn add_documents(
    config: &Config,
    files: &[PathBuf],
    session: Option<String>,
) -> Result<String> {
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    validate_session_id(&session_id)?;

    let paths = SessionPaths::from_config(config);
    let uploads_dir = paths.uploads_dir(&session_id);
    let copied = copy_uploads(files, &uploads_dir)?;
    info!("Uploaded {} files to session {}", copied.len(), session_id);

    let indexer = Indexer::from_config(config)?.with_progress(true);
    let (index, stats) = indexer.index_folder(&uploads_dir, &session_id).await?;

    println!("Session: {}", index.session_id);
    println!("  Storage: {}", index.backend.kind());
    println!("  Documents indexed: {}", stats.documents_indexed);
    println!("  Pages indexed: {}", stats.pages_indexed);
    if stats.documents_failed > 0 {
        println!("  Documents failed: {}", stats.documents_failed);
    }
    if !stats.conversion.converted.is_empty() {
        println!("  Converted to PDF: {}", stats.conversion.converted.len());
    }
    for (path, reason) in &stats.conversion.failed {
        println!("  ⚠️  Could not convert {}: {}", path.display(), reason);
    }

    Ok(session_id)
}

/// Retrieve the pages most relevant to `query` and print their image paths
#[inline]
pub async fn query_session(
    config: &Config,
    session_id: &str,
    query: &str,
    k: Option<usize>,
) -> Result<Vec<PathBuf>> {
    let session = SessionRegistry::open_session(&config.index_root(), session_id)
        .await?
        .with_context(|| format!("Session not found: {}", session_id))?;

    let encoder = HttpEncoder::new(config).context("Failed to initialize encoder client")?;
    let retriever = Retriever::new(Arc::new(encoder), Materializer::new(config.static_root()));

    let k = k.unwrap_or(config.retrieval.top_k);
    let paths: Vec<PathBuf> = retriever
        .retrieve(&session, query, k)
        .await
        .into_iter()
        .map(|relative| config.static_root().join(relative))
        .collect();

    if paths.is_empty() {
        println!("No matching pages found.");
    }
    for path in &paths {
        println!("{}", path.display());
    }
    Ok(paths)
}

/// Print `answer` with the text of every cited section inlined
#[inline]
pub fn expand_session_answer(config: &Config, session_id: &str, answer: &str) -> Result<String> {
    validate_session_id(session_id)?;
    let uploads_dir = SessionPaths::from_config(config).uploads_dir(session_id);
    let sections = load_sections(&uploads_dir)
        .with_context(|| format!("Failed to load sections for session {}", session_id))?;

    let expanded = expand_answer(answer, &sections);
    println!("{}", expanded);
    Ok(expanded)
}

fn uploaded_files(uploads_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(uploads_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// List every session with its page count and uploads
#[inline]
pub async fn list_sessions(config: &Config) -> Result<()> {
    let registry = SessionRegistry::load_existing(&config.index_root()).await?;
    let paths = SessionPaths::from_config(config);

    if registry.is_empty() {
        println!("No sessions have been created yet.");
        println!("Use 'doc-chat add <files...>' to start one.");
        return Ok(());
    }

    println!("Sessions ({} total):", registry.len());
    println!();

    for session_id in registry.ids() {
        let Some(session) = registry.get(session_id) else {
            continue;
        };
        println!("📁 {}", session_id);
        println!("   Storage: {}", session.backend.kind());

        if let IndexBackend::DiskCache(cache) = &session.backend {
            match cache.page_keys().await {
                Ok(keys) => println!("   Pages: {}", keys.len()),
                Err(e) => println!("   Pages: Error - {}", e),
            }
            if let Ok(Some(updated)) = cache.last_updated().await {
                println!("   Last Indexed: {}", updated.format("%Y-%m-%d %H:%M:%S"));
            }
        }

        let files = uploaded_files(&paths.uploads_dir(session_id));
        if !files.is_empty() {
            println!("   Uploads: {}", files.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Delete a session's index, images and uploads
#[inline]
pub async fn delete_session(config: &Config, session_id: &str) -> Result<()> {
    let paths = SessionPaths::from_config(config);
    let mut registry = SessionRegistry::new();
    match SessionRegistry::open_session(&paths.index_root, session_id).await {
        Ok(Some(index)) => {
            registry.insert(index);
        }
        Ok(None) => {}
        // An unreadable index is still removed from disk below
        Err(e) => warn!("Failed to open session {} before deleting: {}", session_id, e),
    }

    if registry.delete_session(session_id, &paths).await? {
        println!("✓ Session deleted: {}", session_id);
    } else {
        println!("Session not found: {}", session_id);
    }
    Ok(())
}

/// Show encoder health and a storage summary
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Doc Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Encoder Status:");
    match HttpEncoder::new(config) {
        Ok(encoder) => {
            let health = tokio::task::spawn_blocking(move || encoder.health_check()).await?;
            match health {
                Ok(()) => {
                    println!(
                        "   ✅ Encoder: Connected ({}:{})",
                        config.encoder.host, config.encoder.port
                    );
                    println!("   📋 Model: {}", config.encoder.model);
                }
                Err(e) => println!("   ❌ Encoder: Unavailable - {:#}", e),
            }
        }
        Err(e) => println!("   ❌ Encoder: Invalid configuration - {:#}", e),
    }
    println!();

    println!("🗄️  Storage:");
    println!("   Base directory: {}", config.get_base_dir().display());
    println!(
        "   Mode: {}",
        match config.retrieval.storage {
            StorageMode::Disk => "disk",
            StorageMode::Native => "native",
        }
    );
    println!("   Top K: {}", config.retrieval.top_k);
    println!();

    println!("📚 Sessions:");
    match SessionRegistry::load_existing(&config.index_root()).await {
        Ok(registry) if registry.is_empty() => println!("   📭 No sessions yet"),
        Ok(registry) => {
            let mut total_pages = 0;
            for session_id in registry.ids() {
                if let Some(IndexBackend::DiskCache(cache)) =
                    registry.get(session_id).map(|s| &s.backend)
                {
                    match cache.page_keys().await {
                        Ok(keys) => total_pages += keys.len(),
                        Err(e) => warn!("Failed to count pages of {}: {}", session_id, e),
                    }
                }
            }
            println!("   📊 Total Sessions: {}", registry.len());
            println!("   📄 Cached Pages: {}", total_pages);
        }
        Err(e) => println!("   ❌ Failed to load sessions: {}", e),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'doc-chat add <files...>' to index documents into a session");
    println!("   • Use 'doc-chat query <text> --session <id>' to retrieve pages");

    Ok(())
}
