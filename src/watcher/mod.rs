pub mod coalescer;

pub use coalescer::{CoalescerConfig, CoalescerHandle, IndexTarget, SettleTarget};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc::UnboundedSender;
use walkdir::WalkDir;

use crate::error::Result;
use crate::index::NoteIndex;
use crate::parser::is_document_path;
use crate::scanner::{ScanOptions, TEMP_FILE_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Add,
    Change,
    Unlink,
}

/// Size and modification time of a file as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileStat {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }

    /// `None` unless `path` is an existing regular file.
    pub fn of(path: &Path) -> Option<Self> {
        fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| Self::from_metadata(&m))
    }
}

/// One raw, unprocessed filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub observed: Option<FileStat>,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed: None,
        }
    }

    pub fn with_stat(mut self, stat: FileStat) -> Self {
        self.observed = Some(stat);
        self
    }
}

/// Translate a notify event into add/change/unlink intents.
pub fn map_event(event: &Event) -> Vec<(PathBuf, FileEventKind)> {
    let all = |kind: FileEventKind| -> Vec<(PathBuf, FileEventKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => all(FileEventKind::Add),
        EventKind::Remove(_) => all(FileEventKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(FileEventKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(FileEventKind::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), FileEventKind::Unlink));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), FileEventKind::Add));
            }
            out
        }
        // Backends that cannot tell rename halves apart
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    FileEventKind::Add
                } else {
                    FileEventKind::Unlink
                };
                (p.clone(), kind)
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => all(FileEventKind::Change),
    }
}

/// Documents outside ignored directories, excluding atomic-write temp files.
pub fn should_process_path(path: &Path, vault_path: &Path, options: &ScanOptions) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if file_name.ends_with(TEMP_FILE_SUFFIX) {
        return false;
    }
    if !is_document_path(path) {
        return false;
    }

    let relative = path.strip_prefix(vault_path).unwrap_or(path);
    for component in relative.components() {
        if let Component::Normal(name) = component {
            if options.is_ignored_name(&name.to_string_lossy()) {
                return false;
            }
        }
    }
    true
}

/// Eligible documents beneath `dir`, walked with the scan's ignore rules.
fn documents_under(dir: &Path, vault_path: &Path, options: &ScanOptions) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !options.is_ignored_name(&entry.file_name().to_string_lossy())
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| should_process_path(path, vault_path, options))
        .collect()
}

fn observed_event(path: PathBuf, kind: FileEventKind) -> FileEvent {
    let mut event = FileEvent::new(path, kind);
    if kind != FileEventKind::Unlink {
        event.observed = FileStat::of(&event.path);
    }
    event
}

/// Turn one mapped notification into per-document events.
///
/// A directory that appeared (created or renamed into place) yields an add for
/// every document inside it. An unlink for something that is no longer a file
/// also unlinks every indexed note under that path, which covers directories
/// removed or renamed away. Other directory events are dropped.
pub fn expand_event(
    path: &Path,
    kind: FileEventKind,
    vault_path: &Path,
    options: &ScanOptions,
    index: &NoteIndex,
) -> Vec<FileEvent> {
    let mut events = Vec::new();

    if path.is_dir() {
        if kind == FileEventKind::Add {
            events.extend(
                documents_under(path, vault_path, options)
                    .into_iter()
                    .map(|doc| observed_event(doc, FileEventKind::Add)),
            );
        }
        return events;
    }

    if kind == FileEventKind::Unlink && !path.is_file() {
        let contained = index.paths_under(path);
        if !contained.is_empty() {
            log::debug!(
                "[watcher] {:?} went away with {} indexed note(s) inside",
                path,
                contained.len()
            );
        }
        events.extend(
            contained
                .into_iter()
                .map(|doc| FileEvent::new(doc, FileEventKind::Unlink)),
        );
    }

    if should_process_path(path, vault_path, options) {
        events.push(observed_event(path.to_path_buf(), kind));
    }
    events
}

/// OS watch subscription on a vault root. Dropping it releases the watch.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

impl VaultWatcher {
    /// Watch `vault_path` recursively and forward document events to `tx`.
    /// `index` is consulted to expand directory removals into note unlinks.
    pub fn start(
        vault_path: &Path,
        options: ScanOptions,
        index: Arc<NoteIndex>,
        tx: UnboundedSender<FileEvent>,
    ) -> Result<Self> {
        let vault = vault_path.to_path_buf();
        let handler_vault = vault.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for (path, kind) in map_event(&event) {
                        for file_event in expand_event(&path, kind, &handler_vault, &options, &index) {
                            if tx.send(file_event).is_err() {
                                // Receiver gone; the vault is shutting down
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[watcher] File watcher error: {}", e);
                }
            },
            Config::default(),
        )?;

        watcher.watch(vault.as_path(), RecursiveMode::Recursive)?;
        log::info!("[watcher] Watching {:?}", vault);

        Ok(VaultWatcher { _watcher: watcher })
    }
}
