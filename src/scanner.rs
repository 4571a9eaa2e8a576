use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Result, VaultError};
use crate::note::{normalize_path, Note, NoteId};
use crate::parser::{is_document_path, parse_document};

/// Directory names skipped regardless of configuration.
pub const ALWAYS_IGNORED: &[&str] = &[".obsidian"];

/// Suffix of the sibling temp file used by atomic writes.
pub const TEMP_FILE_SUFFIX: &str = ".notevault-tmp";

pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Exact entry names to skip (not globs)
    pub ignore_patterns: Vec<String>,
    pub max_file_size: u64,
    pub include_attachments: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "node_modules".to_string(),
                ".git".to_string(),
            ],
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            include_attachments: true,
        }
    }
}

impl ScanOptions {
    pub fn is_ignored_name(&self, name: &str) -> bool {
        ALWAYS_IGNORED.contains(&name) || self.ignore_patterns.iter().any(|p| p == name)
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one full walk. `notes` keeps walk order.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub notes: Vec<Note>,
    pub attachments: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
}

pub struct VaultScanner {
    root: PathBuf,
    options: ScanOptions,
}

impl VaultScanner {
    pub fn new(root: impl AsRef<Path>, options: ScanOptions) -> Self {
        Self {
            root: normalize_path(root.as_ref()),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the vault and parse every eligible document.
    /// Per-file failures are recorded in `skipped`; only a missing root fails.
    pub fn scan(&self) -> Result<ScanReport> {
        if !self.root.is_dir() {
            return Err(VaultError::RootNotFound(self.root.clone()));
        }

        log::info!("[scanner] Scanning vault {:?}", self.root);

        let mut report = ScanReport::default();
        let mut document_paths: Vec<PathBuf> = Vec::new();
        let mut visited_dirs: HashSet<PathBuf> = HashSet::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() > 0 {
                    let name = entry.file_name().to_string_lossy();
                    if self.options.is_ignored_name(&name) {
                        return false;
                    }
                }
                if entry.file_type().is_dir() {
                    // Symlinked directories can loop back; enter each real directory once
                    let real = fs::canonicalize(entry.path())
                        .unwrap_or_else(|_| entry.path().to_path_buf());
                    if !visited_dirs.insert(real) {
                        log::debug!("[scanner] Skipping already visited directory {:?}", entry.path());
                        return false;
                    }
                }
                true
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    log::warn!("[scanner] Cannot read {:?}: {}", path, e);
                    report.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(TEMP_FILE_SUFFIX) {
                continue;
            }

            if is_document_path(path) {
                document_paths.push(normalize_path(path));
            } else if self.options.include_attachments {
                report.attachments.push(normalize_path(path));
            }
        }

        let max_size = self.options.max_file_size;
        let results: Vec<(PathBuf, Result<Note>)> = document_paths
            .into_par_iter()
            .map(|path| {
                let result = read_note(&path, max_size);
                (path, result)
            })
            .collect();

        for (path, result) in results {
            match result {
                Ok(note) => report.notes.push(note),
                Err(e) => {
                    log::warn!("[scanner] Skipping {:?}: {}", path, e);
                    report.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "[scanner] Scan finished: {} notes, {} attachments, {} skipped",
            report.notes.len(),
            report.attachments.len(),
            report.skipped.len()
        );

        Ok(report)
    }
}

/// Stat, read and parse one document into a `Note`.
/// Fails with `TooLarge` before reading when the file exceeds `max_size`.
pub fn read_note(path: &Path, max_size: u64) -> Result<Note> {
    let metadata = fs::metadata(path).map_err(|e| VaultError::io(path, e))?;
    if !metadata.is_file() {
        return Err(VaultError::io(
            path,
            std::io::Error::other("not a regular file"),
        ));
    }
    if metadata.len() > max_size {
        return Err(VaultError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: max_size,
        });
    }

    let bytes = fs::read(path).map_err(|e| VaultError::io(path, e))?;
    let doc = parse_document(path, &bytes)?;

    let normalized = normalize_path(path);
    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    // Birth time is not available everywhere
    let created_at: DateTime<Utc> = metadata
        .created()
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified_at);

    Ok(Note {
        id: NoteId::from_path(&normalized),
        title: doc.title,
        file_name: normalized
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: normalized.to_string_lossy().to_string(),
        body: doc.body,
        tags: doc.tags,
        links: doc.links,
        backlinks: Vec::new(),
        metadata: doc.frontmatter,
        created_at,
        modified_at,
        size_bytes: bytes.len() as u64,
    })
}
