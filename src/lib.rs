pub mod config;
pub mod error;
pub mod frontmatter;
pub mod index;
pub mod insights;
pub mod note;
pub mod parser;
pub mod scanner;
pub mod search;
pub mod watcher;


#[cfg(test)]
mod coalescer_test;


use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use frontmatter::{Frontmatter, FrontmatterParser};
pub use index::{NoteIndex, NoteSort, SortField, SortOrder};
pub use note::{Backlink, Link, LinkKind, Note, NoteId};
pub use search::{SearchEngine, SearchResult};
pub use watcher::{FileEvent, FileEventKind};

use insights::{CleanupSuggestions, DuplicateGroup, FolderStructure, UsageStats, VaultStats};
use scanner::{read_note, VaultScanner, TEMP_FILE_SUFFIX};
use watcher::{CoalescerHandle, IndexTarget, VaultWatcher};

/// Longest file stem generated from a note title, in characters.
pub const MAX_FILE_STEM_CHARS: usize = 100;

/// Highest ` (n)` suffix tried before giving up on a file name.
pub const MAX_COLLISION_SUFFIX: u32 = 100;

/// Atomic file write: write to a temp file in the same directory, sync, then rename.
/// Watchers and readers never observe a truncated or half-written note.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}{}", file_name, TEMP_FILE_SUFFIX));

    let mut file = fs::File::create(&temp_path).map_err(|e| VaultError::io(&temp_path, e))?;
    file.write_all(content)
        .map_err(|e| VaultError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| VaultError::io(&temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(VaultError::io(path, e));
    }

    Ok(())
}

/// File-system safe stem for a note title.
pub fn sanitize_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let stem = collapsed.trim_start_matches('.').trim();
    let truncated: String = stem.chars().take(MAX_FILE_STEM_CHARS).collect();
    truncated.trim_end().to_string()
}

/// `<dir>/<stem>.md`, or the first free `<stem> (n).md`.
pub fn unique_note_path(dir: &Path, stem: &str) -> Result<PathBuf> {
    let target = dir.join(format!("{}.md", stem));
    if !target.exists() {
        return Ok(target);
    }
    for counter in 1..=MAX_COLLISION_SUFFIX {
        let candidate = dir.join(format!("{} ({}).md", stem, counter));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(VaultError::NameExhausted(stem.to_string()))
}

/// Partial update applied by `Vault::update_note`. Absent fields are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Merged key by key into the metadata block; a null value removes the key
    pub metadata: BTreeMap<String, serde_yaml::Value>,
}

struct LiveUpdates {
    watcher: VaultWatcher,
    coalescer: CoalescerHandle,
}

/// A scanned vault with an optional live index kept in sync with the disk.
pub struct Vault {
    root: PathBuf,
    config: VaultConfig,
    index: Arc<NoteIndex>,
    live: Mutex<Option<LiveUpdates>>,
    scan_lock: tokio::sync::Mutex<()>,
}

impl Vault {
    /// Scan the vault and, when configured, keep it live. The watcher starts
    /// before the scan so edits made during the scan are picked up.
    /// Must be called from within a tokio runtime.
    pub async fn open(config: VaultConfig) -> Result<Self> {
        config.validate()?;
        let root = note::normalize_path(&config.vault_path);
        if !root.is_dir() {
            return Err(VaultError::RootNotFound(root));
        }

        let vault = Self {
            root,
            config,
            index: Arc::new(NoteIndex::new()),
            live: Mutex::new(None),
            scan_lock: tokio::sync::Mutex::new(()),
        };

        if vault.config.watch_for_changes {
            vault.start_live_updates()?;
        }
        if let Err(e) = vault.rescan().await {
            vault.shutdown().await;
            return Err(e);
        }

        log::info!(
            "[vault] Opened {:?} with {} notes (watching: {})",
            vault.root,
            vault.index.len(),
            vault.config.watch_for_changes
        );
        Ok(vault)
    }

    fn start_live_updates(&self) -> Result<()> {
        let target = Arc::new(IndexTarget::new(
            Arc::clone(&self.index),
            self.config.max_file_size,
        ));
        let coalescer = CoalescerHandle::spawn(self.config.coalescer_config(), target);
        let watcher = VaultWatcher::start(
            &self.root,
            self.config.scan_options(),
            Arc::clone(&self.index),
            coalescer.sender(),
        )?;
        *self.live.lock().unwrap_or_else(|e| e.into_inner()) = Some(LiveUpdates {
            watcher,
            coalescer,
        });
        Ok(())
    }

    /// Full scan, swapped in atomically. Notes changed by live updates while
    /// the scan ran keep their newer state. Returns the note count.
    pub async fn rescan(&self) -> Result<usize> {
        let _scan = self.scan_lock.lock().await;
        let since = self.index.generation();

        let scanner = VaultScanner::new(&self.root, self.config.scan_options());
        let report = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??;

        self.index
            .replace_all_since(report.notes, report.attachments, since);
        Ok(self.index.len())
    }

    /// Release the watch subscription and stop the coalescer.
    pub async fn shutdown(&self) {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(live) = live {
            drop(live.watcher);
            live.coalescer.shutdown().await;
            log::info!("[vault] Stopped watching {:?}", self.root);
        }
    }

    pub fn is_watching(&self) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Feed an event to the live coalescer, as the OS watcher does.
    /// `None` when the vault is not watching.
    pub fn event_sender(&self) -> Option<UnboundedSender<FileEvent>> {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.as_ref().map(|l| l.coalescer.sender())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<NoteIndex> {
        &self.index
    }

    // ---- read API ----

    pub fn get_note(&self, id: &NoteId) -> Option<Note> {
        self.index.get(id)
    }

    pub fn get_all_notes(&self, sort: NoteSort, limit: Option<usize>) -> Vec<Note> {
        self.index.all(sort, limit)
    }

    pub fn search_notes(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        SearchEngine::search(&self.index.snapshot(), query, limit)
    }

    pub fn get_notes_by_tag(&self, tag: &str, limit: usize) -> Vec<Note> {
        self.index.by_tag(tag, limit)
    }

    pub fn get_notes_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Note> {
        self.index.by_date_range(start, end)
    }

    pub fn get_notes_by_size(&self, min: u64, max: Option<u64>) -> Vec<Note> {
        self.index.by_size(min, max)
    }

    pub fn get_related_notes(&self, id: &NoteId, limit: usize) -> Result<Vec<Note>> {
        self.index
            .related(id, limit)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }

    pub fn get_recent_notes(&self, limit: usize) -> Vec<Note> {
        self.index.recent(limit)
    }

    pub fn get_recommended_notes(&self, id: &NoteId, limit: usize) -> Result<Vec<Note>> {
        insights::recommended(&self.index.snapshot(), id, limit, Utc::now())
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }

    pub fn get_vault_stats(&self) -> VaultStats {
        insights::vault_stats(&self.index.snapshot())
    }

    pub fn get_usage_stats(&self) -> UsageStats {
        insights::usage_stats(&self.index.snapshot())
    }

    pub fn find_duplicate_notes(&self) -> Vec<DuplicateGroup> {
        insights::find_duplicates(&self.index.snapshot())
    }

    pub fn extract_keywords(&self, id: &NoteId, max: usize) -> Result<Vec<String>> {
        let note = self
            .index
            .get(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        Ok(insights::extract_keywords(&note.body, max))
    }

    pub fn analyze_folder_structure(&self) -> FolderStructure {
        insights::folder_structure(&self.index.snapshot(), &self.root)
    }

    pub fn suggest_cleanup(&self) -> CleanupSuggestions {
        insights::cleanup_suggestions(&self.index.snapshot())
    }

    // ---- write API ----

    /// Write a new note to the vault root and index it.
    pub fn create_note(&self, title: &str, body: &str, tags: &[String]) -> Result<Note> {
        let title = title.trim();
        if title.is_empty() {
            return Err(VaultError::InvalidTitle(title.to_string()));
        }
        let stem = sanitize_file_name(title);
        if stem.is_empty() {
            return Err(VaultError::InvalidTitle(title.to_string()));
        }

        let path = unique_note_path(&self.root, &stem)?;
        let frontmatter = Frontmatter {
            title: Some(title.to_string()),
            tags: frontmatter::normalize_tags(tags),
            created: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        };
        let content = FrontmatterParser::combine(Some(&frontmatter), body)?;
        atomic_write_file(&path, content.as_bytes())?;

        let note = self.index_written(&path)?;
        log::info!("[vault] Created note {:?}", path);
        Ok(note)
    }

    /// Merge `update` into the note's file and re-index it.
    pub fn update_note(&self, id: &NoteId, update: NoteUpdate) -> Result<Note> {
        let existing = self
            .index
            .get(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        let path = PathBuf::from(&existing.path);

        let content = fs::read_to_string(&path).map_err(|e| VaultError::io(&path, e))?;
        let (mut frontmatter, body) = FrontmatterParser::parse(&content);

        if let Some(title) = update.title.as_deref().map(str::trim) {
            if title.is_empty() {
                return Err(VaultError::InvalidTitle(title.to_string()));
            }
            frontmatter.title = Some(title.to_string());
        }
        if let Some(tags) = &update.tags {
            frontmatter.tags = frontmatter::normalize_tags(tags);
        }
        for (key, value) in update.metadata {
            frontmatter.merge_value(&key, value);
        }
        frontmatter.modified = Some(Utc::now().to_rfc3339());

        let body = update.body.unwrap_or_else(|| body.trim_start_matches('\n').to_string());
        let content = FrontmatterParser::combine(Some(&frontmatter), &body)?;
        atomic_write_file(&path, content.as_bytes())?;

        let note = self.index_written(&path)?;
        log::info!("[vault] Updated note {:?}", path);
        Ok(note)
    }

    /// Remove the file, then the index entry. A file that is already gone
    /// counts as removed; any other failure leaves the index untouched.
    pub fn delete_note(&self, id: &NoteId) -> Result<()> {
        let existing = self
            .index
            .get(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        let path = PathBuf::from(&existing.path);

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[vault] {:?} was already gone", path);
            }
            Err(e) => return Err(VaultError::io(&path, e)),
        }

        self.index.remove(id);
        log::info!("[vault] Deleted note {:?}", path);
        Ok(())
    }

    fn index_written(&self, path: &Path) -> Result<Note> {
        let note = read_note(path, self.config.max_file_size)?;
        let id = note.id.clone();
        self.index.upsert(note);
        self.index
            .get(&id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }
}
