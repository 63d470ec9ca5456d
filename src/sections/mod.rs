// Sections module
// Finds "Section N" citations in answers and inlines the cited section text


use fancy_regex::{Captures, Regex};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::converter::{is_pdf, list_files};
use crate::{DocChatError, Result};

/// Section number to section body
pub type SectionMap = BTreeMap<String, String>;

static SECTION_REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Section\s+(\d+(?:\.\d+)*)").expect("valid regex"));

static SECTION_HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:Section\s+)?(\d+(?:\.\d+)*)").expect("valid regex"));

/// Extensions whose text is searched for numbered sections
const SECTION_SOURCE_EXTENSIONS: &[&str] = &["txt", "md", "pdf"];

/// Section numbers cited in `answer`, first occurrence order, without repeats
#[inline]
pub fn find_section_references(answer: &str) -> Vec<String> {
    SECTION_REFERENCE_REGEX
        .captures_iter(answer)
        .filter_map(|captures| captures.ok())
        .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
        .unique()
        .collect()
}

/// Split a document into numbered sections.
///
/// A line that starts with an optional `Section ` and a dotted number opens a
/// section; the lines after it, up to the next heading, are its body. Text
/// before the first heading is ignored. A repeated number restarts that
/// section.
#[inline]
pub fn parse_sections(text: &str) -> SectionMap {
    let mut sections = SectionMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let heading = SECTION_HEADING_REGEX
            .captures(line.trim())
            .ok()
            .flatten()
            .and_then(|captures| captures.get(1).map(|m| m.as_str().to_string()));

        if let Some(number) = heading {
            sections.insert(number.clone(), String::new());
            current = Some(number);
        } else if let Some(body) = current.as_ref().and_then(|n| sections.get_mut(n)) {
            body.push_str(line);
            body.push('\n');
        }
    }

    sections
}

/// Plain text of a PDF's pages, in page order
#[inline]
pub fn extract_pdf_text(path: &Path) -> Result<String> {
    // The extractor panics on some malformed fonts; treat that like any other parse failure
    std::panic::catch_unwind(|| pdf_extract::extract_text(path))
        .map_err(|_| {
            DocChatError::Other(anyhow::anyhow!(
                "PDF text extraction panicked for {}",
                path.display()
            ))
        })?
        .map_err(|e| {
            DocChatError::Other(anyhow::anyhow!(
                "Failed to extract text from {}: {}",
                path.display(),
                e
            ))
        })
}

fn read_section_source(path: &Path) -> Result<String> {
    if is_pdf(path) {
        extract_pdf_text(path)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

/// Sections from every `.txt`, `.md` and `.pdf` file in `folder`.
///
/// Files are read in name order, so a later file wins when two define the
/// same number. Unreadable files are logged and skipped.
#[inline]
pub fn load_sections(folder: &Path) -> Result<SectionMap> {
    let mut sections = SectionMap::new();

    for path in list_files(folder)? {
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SECTION_SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_source {
            continue;
        }

        match read_section_source(&path) {
            Ok(text) => {
                let parsed = parse_sections(&text);
                debug!("Found {} sections in {}", parsed.len(), path.display());
                sections.extend(parsed);
            }
            Err(e) => warn!("Failed to read {}: {}", path.display(), e),
        }
    }

    Ok(sections)
}

/// Bodies of the referenced sections that exist and are not blank
#[inline]
pub fn get_section_texts(references: &[String], sections: &SectionMap) -> SectionMap {
    references
        .iter()
        .filter_map(|number| {
            sections
                .get(number)
                .filter(|body| !body.trim().is_empty())
                .map(|body| (number.clone(), body.clone()))
        })
        .collect()
}

/// Rewrite every citation of a known section as `Section N: "<body>"`.
///
/// Numbers are matched whole, so text for `1` never lands inside a citation
/// of `1.2`.
#[inline]
pub fn embed_section_text(answer: &str, section_texts: &SectionMap) -> String {
    if section_texts.is_empty() {
        return answer.to_string();
    }

    SECTION_REFERENCE_REGEX
        .replace_all(answer, |captures: &Captures<'_>| {
            let cited = captures.get(0).map_or("", |m| m.as_str());
            let number = captures.get(1).map_or("", |m| m.as_str());
            match section_texts.get(number) {
                Some(body) => format!("{}: \"{}\"", cited, body.trim()),
                None => cited.to_string(),
            }
        })
        .into_owned()
}

/// Inline the text of every section `answer` cites
#[inline]
pub fn expand_answer(answer: &str, sections: &SectionMap) -> String {
    let references = find_section_references(answer);
    let texts = get_section_texts(&references, sections);
    embed_section_text(answer, &texts)
}
