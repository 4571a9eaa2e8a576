pub mod graph;

pub use graph::BacklinkGraph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::note::{Note, NoteId};

pub const DEFAULT_TAG_LIMIT: usize = 20;
pub const DEFAULT_RELATED_LIMIT: usize = 10;
pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Title,
    CreatedAt,
    #[default]
    ModifiedAt,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoteSort {
    pub field: SortField,
    pub order: SortOrder,
}

/// Immutable view of the whole index. Notes are stored with backlinks and
/// resolved link paths already filled in, so readers never see a half-built graph.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    notes: HashMap<NoteId, Note>,
    /// Ids sorted by path; the iteration order of every query
    order: Vec<NoteId>,
    attachments: Vec<PathBuf>,
    graph: BacklinkGraph,
}

impl IndexSnapshot {
    fn build(mut notes: HashMap<NoteId, Note>, attachments: Vec<PathBuf>) -> Self {
        let graph = BacklinkGraph::build(&notes);

        let paths: HashMap<NoteId, String> = notes
            .iter()
            .map(|(id, note)| (id.clone(), note.path.clone()))
            .collect();

        for (id, note) in notes.iter_mut() {
            note.backlinks = graph.backlinks_of(id);
            for (i, link) in note.links.iter_mut().enumerate() {
                if !link.is_internal() {
                    link.resolved_path = None;
                    continue;
                }
                link.resolved_path = graph
                    .resolved_link(id, i)
                    .and_then(|target| paths.get(target).cloned());
            }
        }

        let mut order: Vec<NoteId> = notes.keys().cloned().collect();
        order.sort_by(|a, b| notes[a].path.cmp(&notes[b].path));

        Self {
            notes,
            order,
            attachments,
            graph,
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes in path order.
    pub fn iter(&self) -> impl Iterator<Item = &Note> + '_ {
        self.order.iter().filter_map(move |id| self.notes.get(id))
    }

    pub fn attachments(&self) -> &[PathBuf] {
        &self.attachments
    }

    pub fn get(&self, id: &NoteId) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn all(&self, sort: NoteSort, limit: Option<usize>) -> Vec<Note> {
        let mut notes: Vec<&Note> = self.iter().collect();
        notes.sort_by(|a, b| {
            let ord = match sort.field {
                SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::ModifiedAt => a.modified_at.cmp(&b.modified_at),
                SortField::Size => a.size_bytes.cmp(&b.size_bytes),
            };
            match sort.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        take(notes, limit)
    }

    /// Exact tag match, most recently modified first.
    pub fn by_tag(&self, tag: &str, limit: usize) -> Vec<Note> {
        let tag = tag.trim().trim_start_matches('#');
        let mut notes: Vec<&Note> = self.iter().filter(|n| n.has_tag(tag)).collect();
        notes.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        take(notes, Some(limit))
    }

    /// Notes created within `[start, end]`, newest first.
    pub fn by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Note> {
        let mut notes: Vec<&Note> = self
            .iter()
            .filter(|n| n.created_at >= start && n.created_at <= end)
            .collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        take(notes, None)
    }

    /// Notes with `min <= size <= max`, largest first.
    pub fn by_size(&self, min: u64, max: Option<u64>) -> Vec<Note> {
        let max = max.unwrap_or(u64::MAX);
        let mut notes: Vec<&Note> = self
            .iter()
            .filter(|n| n.size_bytes >= min && n.size_bytes <= max)
            .collect();
        notes.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        take(notes, None)
    }

    /// Resolved forward targets followed by backlink sources, without repeats.
    /// `None` when `id` is unknown.
    pub fn related(&self, id: &NoteId, limit: usize) -> Option<Vec<Note>> {
        let note = self.notes.get(id)?;

        let mut related: Vec<NoteId> = Vec::new();
        for target in self.graph.forward_targets(id) {
            if target != *id && !related.contains(&target) {
                related.push(target);
            }
        }
        for backlink in &note.backlinks {
            let source = NoteId::from_path(Path::new(&backlink.from_note_path));
            if source != *id && !related.contains(&source) {
                related.push(source);
            }
        }

        Some(
            related
                .iter()
                .filter_map(|rid| self.notes.get(rid))
                .take(limit)
                .cloned()
                .collect(),
        )
    }

    /// Newest `createdAt` first.
    pub fn recent(&self, limit: usize) -> Vec<Note> {
        let mut notes: Vec<&Note> = self.iter().collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        take(notes, Some(limit))
    }
}

fn take(notes: Vec<&Note>, limit: Option<usize>) -> Vec<Note> {
    notes
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

/// Ids touched by incremental mutations, with the generation of the last touch.
#[derive(Debug, Default)]
struct WriteLog {
    generation: u64,
    touched: HashMap<NoteId, u64>,
}

/// Authoritative in-memory note collection.
///
/// Mutations are serialized by `writer` and build a complete new snapshot
/// (graph included) before swapping it in, so the `RwLock` is held for writing
/// only for the pointer swap. Readers clone the `Arc` and work without locks.
pub struct NoteIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<WriteLog>,
}

impl Default for NoteIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteIndex {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(WriteLog::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn publish(&self, next: IndexSnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
    }

    /// Run `f` on a private copy of the raw notes and publish the rebuilt snapshot.
    fn mutate<R>(&self, id: &NoteId, f: impl FnOnce(&mut HashMap<NoteId, Note>) -> R) -> R {
        let mut log = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        log.generation += 1;
        let generation = log.generation;
        log.touched.insert(id.clone(), generation);

        let current = self.snapshot();
        let mut notes = current.notes.clone();
        let out = f(&mut notes);
        self.publish(IndexSnapshot::build(notes, current.attachments.clone()));
        out
    }

    /// Counter of incremental mutations. Take it before a scan starts and
    /// hand it to `replace_all_since`.
    pub fn generation(&self) -> u64 {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generation
    }

    /// Swap in a complete collection, discarding all live state.
    #[cfg(test)]
    pub(crate) fn replace_all(&self, notes: Vec<Note>, attachments: Vec<PathBuf>) {
        self.replace_all_since(notes, attachments, u64::MAX);
    }

    /// Swap in a scan that began at generation `since`. Notes upserted or
    /// removed after that point are newer than the scan's reading of them
    /// and keep their live state.
    pub fn replace_all_since(&self, notes: Vec<Note>, attachments: Vec<PathBuf>, since: u64) {
        let mut log = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot();
        let mut map: HashMap<NoteId, Note> = notes.into_iter().map(|n| (n.id.clone(), n)).collect();

        let mut kept = 0;
        for (id, generation) in &log.touched {
            if *generation <= since {
                continue;
            }
            kept += 1;
            match current.notes.get(id) {
                Some(live) => {
                    map.insert(id.clone(), live.clone());
                }
                None => {
                    map.remove(id);
                }
            }
        }
        log.touched.retain(|_, generation| *generation > since);

        let count = map.len();
        self.publish(IndexSnapshot::build(map, attachments));
        log::debug!(
            "[index] Replaced collection with {} notes ({} kept from live updates)",
            count,
            kept
        );
    }

    /// Insert or replace by id. Returns true when the note was new.
    pub fn upsert(&self, note: Note) -> bool {
        log::debug!("[index] Upsert {}", note.path);
        let id = note.id.clone();
        self.mutate(&id, |notes| notes.insert(note.id.clone(), note).is_none())
    }

    pub fn remove(&self, id: &NoteId) -> Option<Note> {
        let removed = self.mutate(id, |notes| notes.remove(id));
        if let Some(note) = &removed {
            log::debug!("[index] Removed {}", note.path);
        }
        removed
    }

    pub fn remove_path(&self, path: &Path) -> Option<Note> {
        self.remove(&NoteId::from_path(path))
    }

    /// Paths of indexed notes strictly inside directory `dir`.
    pub fn paths_under(&self, dir: &Path) -> Vec<PathBuf> {
        let dir = crate::note::normalize_path(dir);
        self.snapshot()
            .iter()
            .map(|note| PathBuf::from(&note.path))
            .filter(|path| path != &dir && path.starts_with(&dir))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn get(&self, id: &NoteId) -> Option<Note> {
        self.snapshot().get(id).cloned()
    }

    pub fn all(&self, sort: NoteSort, limit: Option<usize>) -> Vec<Note> {
        self.snapshot().all(sort, limit)
    }

    pub fn by_tag(&self, tag: &str, limit: usize) -> Vec<Note> {
        self.snapshot().by_tag(tag, limit)
    }

    pub fn by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Note> {
        self.snapshot().by_date_range(start, end)
    }

    pub fn by_size(&self, min: u64, max: Option<u64>) -> Vec<Note> {
        self.snapshot().by_size(min, max)
    }

    pub fn related(&self, id: &NoteId, limit: usize) -> Option<Vec<Note>> {
        self.snapshot().related(id, limit)
    }

    pub fn recent(&self, limit: usize) -> Vec<Note> {
        self.snapshot().recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontmatter::Frontmatter;
    use crate::parser::extract_links;
    use chrono::TimeZone;

    fn note(path: &str, body: &str, size: u64, day: u32) -> Note {
        let p = Path::new(path);
        Note {
            id: NoteId::from_path(p),
            title: p.file_stem().unwrap().to_string_lossy().to_string(),
            file_name: p.file_name().unwrap().to_string_lossy().to_string(),
            path: path.to_string(),
            body: body.to_string(),
            tags: Vec::new(),
            links: extract_links(body),
            backlinks: Vec::new(),
            metadata: Frontmatter::default(),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            modified_at: Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap(),
            size_bytes: size,
        }
    }

    #[test]
    fn test_upsert_reports_new_vs_replace() {
        let index = NoteIndex::new();
        assert!(index.upsert(note("/v/A.md", "a", 1, 1)));
        assert!(!index.upsert(note("/v/A.md", "a2", 2, 1)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&NoteId::from_path(Path::new("/v/A.md"))).unwrap().body, "a2");
    }

    #[test]
    fn test_resolved_path_is_materialized() {
        let index = NoteIndex::new();
        index.replace_all(
            vec![
                note("/v/A.md", "[[B]] [[Missing]] [web](https://x.io)", 1, 1),
                note("/v/B.md", "", 1, 2),
            ],
            Vec::new(),
        );
        let a = index.get(&NoteId::from_path(Path::new("/v/A.md"))).unwrap();
        assert_eq!(a.links[0].resolved_path.as_deref(), Some("/v/B.md"));
        assert_eq!(a.links[1].resolved_path, None);
        assert_eq!(a.links[2].resolved_path, None);
    }

    #[test]
    fn test_old_snapshot_is_unaffected_by_mutation() {
        let index = NoteIndex::new();
        index.upsert(note("/v/A.md", "[[B]]", 1, 1));
        index.upsert(note("/v/B.md", "", 1, 2));
        let before = index.snapshot();

        index.remove_path(Path::new("/v/A.md"));
        let b_id = NoteId::from_path(Path::new("/v/B.md"));
        assert_eq!(before.get(&b_id).unwrap().backlinks.len(), 1);
        assert!(index.get(&b_id).unwrap().backlinks.is_empty());
    }

    #[test]
    fn test_sorting() {
        let index = NoteIndex::new();
        index.replace_all(
            vec![
                note("/v/b.md", "", 30, 2),
                note("/v/A.md", "", 10, 3),
                note("/v/c.md", "", 20, 1),
            ],
            Vec::new(),
        );

        let by_title: Vec<String> = index
            .all(NoteSort { field: SortField::Title, order: SortOrder::Asc }, None)
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(by_title, vec!["A", "b", "c"]);

        let by_size: Vec<u64> = index
            .all(NoteSort { field: SortField::Size, order: SortOrder::Desc }, Some(2))
            .into_iter()
            .map(|n| n.size_bytes)
            .collect();
        assert_eq!(by_size, vec![30, 20]);

        let newest = index.all(NoteSort::default(), Some(1));
        assert_eq!(newest[0].title, "A");
    }

    #[test]
    fn test_by_tag_is_exact() {
        let index = NoteIndex::new();
        let mut a = note("/v/A.md", "", 1, 1);
        a.tags = vec!["work".into()];
        let mut b = note("/v/B.md", "", 1, 2);
        b.tags = vec!["workshop".into()];
        index.replace_all(vec![a, b], Vec::new());

        let found = index.by_tag("#work", DEFAULT_TAG_LIMIT);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "A");
    }

    #[test]
    fn test_date_and_size_ranges_are_inclusive() {
        let index = NoteIndex::new();
        index.replace_all(
            vec![
                note("/v/A.md", "", 100, 1),
                note("/v/B.md", "", 200, 5),
                note("/v/C.md", "", 300, 10),
            ],
            Vec::new(),
        );

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let titles: Vec<String> = index.by_date_range(start, end).into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["B", "A"]);

        let sizes: Vec<u64> = index.by_size(200, None).into_iter().map(|n| n.size_bytes).collect();
        assert_eq!(sizes, vec![300, 200]);
        assert_eq!(index.by_size(100, Some(200)).len(), 2);
    }

    #[test]
    fn test_related_and_recent() {
        let index = NoteIndex::new();
        index.replace_all(
            vec![
                note("/v/A.md", "[[B]] [[B]] [[A]]", 1, 1),
                note("/v/B.md", "", 1, 2),
                note("/v/C.md", "[[A]]", 1, 3),
            ],
            Vec::new(),
        );

        let a_id = NoteId::from_path(Path::new("/v/A.md"));
        let related: Vec<String> = index.related(&a_id, DEFAULT_RELATED_LIMIT).unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(related, vec!["B", "C"]);
        assert!(index.related(&NoteId::from("missing"), 5).is_none());

        let recent: Vec<String> = index.recent(2).into_iter().map(|n| n.title).collect();
        assert_eq!(recent, vec!["C", "B"]);
    }

    #[test]
    fn test_scan_does_not_clobber_newer_live_updates() {
        let index = NoteIndex::new();
        index.replace_all(
            vec![note("/v/X.md", "old", 1, 1), note("/v/Gone.md", "", 1, 1)],
            Vec::new(),
        );

        // Scan starts and reads stale versions of X and Gone
        let since = index.generation();
        let scanned = vec![
            note("/v/X.md", "old", 1, 1),
            note("/v/Gone.md", "", 1, 1),
            note("/v/Y.md", "[[X]]", 1, 2),
        ];

        // Live updates land while the scan is still running
        index.upsert(note("/v/X.md", "new", 2, 1));
        index.remove_path(Path::new("/v/Gone.md"));

        index.replace_all_since(scanned, Vec::new(), since);

        let x = index.get(&NoteId::from_path(Path::new("/v/X.md"))).unwrap();
        assert_eq!(x.body, "new");
        assert_eq!(x.backlinks.len(), 1);
        assert!(index.get(&NoteId::from_path(Path::new("/v/Gone.md"))).is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_updates_before_scan_start_are_superseded() {
        let index = NoteIndex::new();
        index.upsert(note("/v/X.md", "early", 1, 1));

        let since = index.generation();
        index.replace_all_since(vec![note("/v/X.md", "scanned", 1, 1)], Vec::new(), since);
        assert_eq!(index.get(&NoteId::from_path(Path::new("/v/X.md"))).unwrap().body, "scanned");

        // The touch log was pruned, so a plain rescan wins too
        index.replace_all(Vec::new(), Vec::new());
        assert!(index.is_empty());
    }

    #[test]
    fn test_paths_under_directory() {
        let index = NoteIndex::new();
        index.replace_all(
            vec![
                note("/v/sub/A.md", "", 1, 1),
                note("/v/sub/deep/B.md", "", 1, 1),
                note("/v/subway.md", "", 1, 1),
                note("/v/C.md", "", 1, 1),
            ],
            Vec::new(),
        );
        let mut under = index.paths_under(Path::new("/v/sub"));
        under.sort();
        assert_eq!(
            under,
            vec![PathBuf::from("/v/sub/A.md"), PathBuf::from("/v/sub/deep/B.md")]
        );
        assert!(index.paths_under(Path::new("/v/C.md")).is_empty());
    }
}
