// Document conversion module
// Turns uploaded office documents into PDFs before page encoding


use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Extensions handed to the office converter
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "odt", "rtf", "ppt", "pptx", "odp", "xls", "xlsx", "ods",
];

/// Outcome of converting one folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ConversionReport {
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Converts the documents of a folder to PDF in place.
///
/// Per-file failures are reported, never returned as errors. An error means
/// the folder itself could not be read.
pub trait DocumentConverter: Send + Sync {
    fn convert_folder(&self, folder: &Path) -> Result<ConversionReport>;
}

/// Leaves every file untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfOnlyConverter;

impl DocumentConverter for PdfOnlyConverter {
    #[inline]
    fn convert_folder(&self, folder: &Path) -> Result<ConversionReport> {
        let mut report = ConversionReport::default();
        for path in list_files(folder)? {
            if !is_pdf(&path) {
                report.skipped.push(path);
            }
        }
        Ok(report)
    }
}

/// Runs LibreOffice in headless mode for every convertible document
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    command: String,
}

impl Default for SofficeConverter {
    #[inline]
    fn default() -> Self {
        Self::new("soffice")
    }
}

impl SofficeConverter {
    #[inline]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    fn convert_file(&self, path: &Path, out_dir: &Path) -> Result<PathBuf> {
        let output = Command::new(&self.command)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(path)
            .output()
            .with_context(|| format!("failed to spawn {}", self.command))?;

        anyhow::ensure!(
            output.status.success(),
            "{} exited with status {}: {}",
            self.command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        let pdf_path = path.with_extension("pdf");
        anyhow::ensure!(
            pdf_path.exists(),
            "{} reported success but produced no {}",
            self.command,
            pdf_path.display()
        );
        Ok(pdf_path)
    }
}

impl DocumentConverter for SofficeConverter {
    #[inline]
    fn convert_folder(&self, folder: &Path) -> Result<ConversionReport> {
        let mut report = ConversionReport::default();

        for path in list_files(folder)? {
            if is_pdf(&path) {
                continue;
            }
            if !is_convertible(&path) {
                debug!("Not converting {}", path.display());
                report.skipped.push(path);
                continue;
            }
            if path.with_extension("pdf").exists() {
                debug!("{} already converted", path.display());
                report.skipped.push(path);
                continue;
            }

            match self.convert_file(&path, folder) {
                Ok(pdf) => {
                    info!("Converted {} to {}", path.display(), pdf.display());
                    report.converted.push(pdf);
                }
                Err(e) => {
                    warn!("Failed to convert {}: {:#}", path.display(), e);
                    report.failed.push((path, format!("{:#}", e)));
                }
            }
        }

        Ok(report)
    }
}

/// Regular files directly inside `folder`, sorted by name
#[inline]
pub fn list_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)
        .with_context(|| format!("Failed to read folder: {}", folder.display()))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", folder.display()))?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

#[inline]
pub fn is_pdf(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|e| e == "pdf")
}

#[inline]
pub fn is_convertible(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|e| CONVERTIBLE_EXTENSIONS.contains(&e.as_str()))
}
