//! Document loader: walks `[documents].root` and turns matching files into
//! [`SourceItem`]s.
//!
//! Scanning and loading are separate steps so ingest can apply checkpoint
//! and date filters on file metadata before paying for PDF extraction.

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::extract::{extract_text, mime_for_extension, ExtractError};
use crate::models::SourceItem;

pub const SOURCE: &str = "filesystem";

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// A file found under the documents root.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub path: PathBuf,
    /// Path relative to the root, used as the document's `source_id`.
    pub relative: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl DocumentFile {
    /// MIME type when the file needs binary extraction.
    pub fn binary_mime(&self) -> Option<&'static str> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(mime_for_extension)
    }
}

/// Why a file could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{size} bytes exceeds max_extract_bytes ({limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// List files matching the include globs, sorted by relative path.
pub fn scan_documents(config: &DocumentsConfig) -> Result<Vec<DocumentFile>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Documents root does not exist: {}", root.display());
    }

    let include_set = build_globset(config.include_globs.iter().map(String::as_str))?;
    let exclude_set = build_globset(
        DEFAULT_EXCLUDES
            .into_iter()
            .chain(config.exclude_globs.iter().map(String::as_str)),
    )?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }

        let metadata = entry.metadata()?;
        let modified_secs = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(DocumentFile {
            path: path.to_path_buf(),
            relative,
            modified: Utc
                .timestamp_opt(modified_secs, 0)
                .single()
                .unwrap_or_default(),
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Read a file and convert it to a [`SourceItem`], extracting text from
/// PDF and OOXML files.
pub fn load_document(file: &DocumentFile, max_extract_bytes: u64) -> Result<SourceItem, LoadError> {
    let (content_type, body) = match file.binary_mime() {
        Some(mime) => {
            if file.size > max_extract_bytes {
                return Err(LoadError::TooLarge {
                    size: file.size,
                    limit: max_extract_bytes,
                });
            }
            let bytes = std::fs::read(&file.path)?;
            (mime, extract_text(&bytes, mime)?)
        }
        None => {
            let bytes = std::fs::read(&file.path)?;
            let mime = match file.path.extension().and_then(|e| e.to_str()) {
                Some("md") => "text/markdown",
                _ => "text/plain",
            };
            (mime, String::from_utf8_lossy(&bytes).into_owned())
        }
    };

    let title = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());
    let metadata = serde_json::json!({ "path": file.relative, "bytes": file.size });

    Ok(SourceItem {
        source: SOURCE.to_string(),
        source_id: file.relative.clone(),
        source_url: Some(file_url(&file.path)),
        title,
        author: None,
        created_at: file.modified,
        updated_at: file.modified,
        content_type: content_type.to_string(),
        body,
        metadata_json: metadata.to_string(),
        raw_json: None,
    })
}

fn file_url(path: &Path) -> String {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn docs_config(root: &Path) -> DocumentsConfig {
        DocumentsConfig {
            root: root.to_path_buf(),
            ..DocumentsConfig::default()
        }
    }

    #[test]
    fn scan_applies_globs_and_default_excludes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("reports/2024")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("reports/2024/q1.md"), "# Q1").unwrap();
        fs::write(root.join("notes.txt"), "notes").unwrap();
        fs::write(root.join("image.png"), [0u8; 4]).unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "x").unwrap();

        let files = scan_documents(&docs_config(root)).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["notes.txt", "reports/2024/q1.md"]);
    }

    #[test]
    fn scan_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = scan_documents(&docs_config(&tmp.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn load_text_and_oversized_binary() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("fund.md"), "# Fund\n\nNAV 102.4").unwrap();
        fs::write(root.join("big.pdf"), vec![0u8; 64]).unwrap();

        let files = scan_documents(&docs_config(root)).unwrap();
        let big = files.iter().find(|f| f.relative == "big.pdf").unwrap();
        assert!(matches!(
            load_document(big, 10),
            Err(LoadError::TooLarge { size: 64, limit: 10 })
        ));
        assert!(matches!(load_document(big, 1000), Err(LoadError::Extract(_))));

        let md = files.iter().find(|f| f.relative == "fund.md").unwrap();
        let item = load_document(md, 10).unwrap();
        assert_eq!(item.source, "filesystem");
        assert_eq!(item.content_type, "text/markdown");
        assert_eq!(item.title.as_deref(), Some("fund.md"));
        assert!(item.body.contains("NAV 102.4"));
        assert!(item.source_url.unwrap().starts_with("file://"));
    }
}
