//! Aggregate reports computed from an index snapshot: statistics, duplicate
//! detection, keyword ranking, recommendations, folder layout and cleanup hints.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path};

use crate::index::IndexSnapshot;
use crate::note::{Note, NoteId};

pub const DEFAULT_KEYWORD_LIMIT: usize = 10;
pub const DEFAULT_RECOMMENDATION_LIMIT: usize = 5;
pub const LARGE_NOTE_BYTES: u64 = 1024 * 1024;
const TOP_N: usize = 10;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did",
        "will", "would", "could", "should", "may", "might", "can", "this", "that", "these",
        "those", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStats {
    pub total_notes: usize,
    pub total_attachments: usize,
    /// Tag occurrences across all notes
    pub total_tags: usize,
    pub unique_tags: Vec<String>,
    pub average_note_size: u64,
    pub total_size: u64,
    pub oldest_note: Option<DateTime<Utc>>,
    pub newest_note: Option<DateTime<Utc>>,
    pub tag_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedNote {
    pub note: Note,
    pub backlink_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub recently_modified: Vec<Note>,
    pub most_linked_notes: Vec<LinkedNote>,
    pub most_used_tags: Vec<TagCount>,
    pub largest_notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub title: String,
    pub notes: Vec<Note>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStats {
    pub note_count: usize,
    pub total_size: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub path: String,
    pub note_count: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStructure {
    pub folders: BTreeMap<String, FolderStats>,
    pub depth: usize,
    pub largest_folders: Vec<FolderSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleGroup {
    pub title: String,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSuggestions {
    pub orphaned_notes: Vec<Note>,
    pub large_notes: Vec<Note>,
    pub untagged_notes: Vec<Note>,
    pub duplicate_titles: Vec<TitleGroup>,
}

pub fn vault_stats(snapshot: &IndexSnapshot) -> VaultStats {
    let mut tag_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut unique_tags: Vec<String> = Vec::new();
    let mut total_tags = 0;
    let mut total_size = 0u64;
    let mut oldest: Option<DateTime<Utc>> = None;
    let mut newest: Option<DateTime<Utc>> = None;

    for note in snapshot.iter() {
        for tag in &note.tags {
            total_tags += 1;
            let count = tag_distribution.entry(tag.clone()).or_insert(0);
            if *count == 0 {
                unique_tags.push(tag.clone());
            }
            *count += 1;
        }
        total_size += note.size_bytes;
        oldest = Some(oldest.map_or(note.created_at, |o| o.min(note.created_at)));
        newest = Some(newest.map_or(note.created_at, |n| n.max(note.created_at)));
    }

    let total_notes = snapshot.len();
    let average_note_size = if total_notes > 0 {
        (total_size as f64 / total_notes as f64).round() as u64
    } else {
        0
    };

    VaultStats {
        total_notes,
        total_attachments: snapshot.attachments().len(),
        total_tags,
        unique_tags,
        average_note_size,
        total_size,
        oldest_note: oldest,
        newest_note: newest,
        tag_distribution,
    }
}

fn tag_counts(snapshot: &IndexSnapshot) -> Vec<TagCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for note in snapshot.iter() {
        for tag in &note.tags {
            *counts.entry(tag.as_str()).or_insert(0) += 1;
        }
    }
    let mut out: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

pub fn usage_stats(snapshot: &IndexSnapshot) -> UsageStats {
    let notes: Vec<&Note> = snapshot.iter().collect();

    let mut recently_modified = notes.clone();
    recently_modified.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

    let mut most_linked: Vec<(&Note, usize)> = notes
        .iter()
        .map(|n| (*n, n.backlinks.len()))
        .filter(|(_, count)| *count > 0)
        .collect();
    most_linked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut largest = notes.clone();
    largest.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

    let mut most_used_tags = tag_counts(snapshot);
    most_used_tags.truncate(TOP_N);

    UsageStats {
        recently_modified: recently_modified.into_iter().take(TOP_N).cloned().collect(),
        most_linked_notes: most_linked
            .into_iter()
            .take(TOP_N)
            .map(|(note, backlink_count)| LinkedNote {
                note: note.clone(),
                backlink_count,
            })
            .collect(),
        most_used_tags,
        largest_notes: largest.into_iter().take(TOP_N).cloned().collect(),
    }
}

/// Notes grouped by trimmed lowercase title, in first-seen order.
fn title_groups(snapshot: &IndexSnapshot) -> Vec<(String, Vec<&Note>)> {
    let mut groups: Vec<(String, Vec<&Note>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for note in snapshot.iter() {
        let key = note.title.trim().to_lowercase();
        match positions.get(&key) {
            Some(&i) => groups[i].1.push(note),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![note]));
            }
        }
    }
    groups.retain(|(_, notes)| notes.len() > 1);
    groups
}

/// Jaccard overlap of the lowercase whitespace-separated word sets.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

pub fn find_duplicates(snapshot: &IndexSnapshot) -> Vec<DuplicateGroup> {
    let mut groups: Vec<DuplicateGroup> = title_groups(snapshot)
        .into_iter()
        .map(|(title, notes)| DuplicateGroup {
            similarity: word_overlap(&notes[0].body, &notes[1].body),
            title,
            notes: notes.into_iter().cloned().collect(),
        })
        .collect();
    groups.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    groups
}

/// Most frequent non-stop-words longer than two characters.
pub fn extract_keywords(body: &str, max: usize) -> Vec<String> {
    let lower = body.to_lowercase();
    let mut order: Vec<&str> = Vec::new();
    let mut freq: HashMap<&str, usize> = HashMap::new();

    for m in WORD_RE.find_iter(&lower) {
        let word = m.as_str();
        if word.chars().count() <= 2 || STOP_WORDS.contains(word) {
            continue;
        }
        let count = freq.entry(word).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }

    // Stable sort: equal counts stay in first-occurrence order
    order.sort_by(|a, b| freq[b].cmp(&freq[a]));
    order.into_iter().take(max).map(str::to_string).collect()
}

/// Notes sharing tags or title words with `id`, boosted by recency.
/// `None` when `id` is unknown.
pub fn recommended(
    snapshot: &IndexSnapshot,
    id: &NoteId,
    limit: usize,
    now: DateTime<Utc>,
) -> Option<Vec<Note>> {
    let note = snapshot.get(id)?;
    let title = note.title.to_lowercase();

    let mut scored: Vec<(&Note, u32)> = snapshot
        .iter()
        .filter(|other| other.id != *id)
        .filter_map(|other| {
            let mut score = 0u32;
            let shared = note.tags.iter().filter(|t| other.has_tag(t.as_str())).count() as u32;
            score += shared * 10;

            let other_title = other.title.to_lowercase();
            if title.contains(&other_title) || other_title.contains(&title) {
                score += 5;
            }

            let age = now - other.modified_at;
            if age < Duration::days(7) {
                score += 3;
            } else if age < Duration::days(30) {
                score += 1;
            }

            (score > 0).then_some((other, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    Some(scored.into_iter().take(limit).map(|(n, _)| n.clone()).collect())
}

pub fn folder_structure(snapshot: &IndexSnapshot, root: &Path) -> FolderStructure {
    let mut folders: BTreeMap<String, FolderStats> = BTreeMap::new();
    let mut folder_tags: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut depth = 0;

    for note in snapshot.iter() {
        let path = Path::new(&note.path);
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut current = String::new();
        for (i, part) in parts.iter().enumerate() {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);

            let folder = folders.entry(current.clone()).or_default();
            folder.note_count += 1;
            folder.total_size += note.size_bytes;
            folder_tags
                .entry(current.clone())
                .or_default()
                .extend(note.tags.iter().cloned());

            depth = depth.max(i + 1);
        }
    }

    for (path, folder) in folders.iter_mut() {
        if let Some(tags) = folder_tags.remove(path) {
            folder.tags = tags.into_iter().collect();
        }
    }

    let mut largest_folders: Vec<FolderSummary> = folders
        .iter()
        .map(|(path, stats)| FolderSummary {
            path: path.clone(),
            note_count: stats.note_count,
            total_size: stats.total_size,
        })
        .collect();
    largest_folders.sort_by(|a, b| b.note_count.cmp(&a.note_count));
    largest_folders.truncate(TOP_N);

    FolderStructure {
        folders,
        depth,
        largest_folders,
    }
}

fn filtered(snapshot: &IndexSnapshot, pred: impl Fn(&Note) -> bool) -> Vec<Note> {
    snapshot.iter().filter(|&n| pred(n)).cloned().collect()
}

pub fn cleanup_suggestions(snapshot: &IndexSnapshot) -> CleanupSuggestions {
    CleanupSuggestions {
        orphaned_notes: filtered(snapshot, |n| n.links.is_empty() && n.backlinks.is_empty()),
        large_notes: filtered(snapshot, |n| n.size_bytes > LARGE_NOTE_BYTES),
        untagged_notes: filtered(snapshot, |n| n.tags.is_empty()),
        duplicate_titles: title_groups(snapshot)
            .into_iter()
            .map(|(title, notes)| TitleGroup {
                title,
                notes: notes.into_iter().cloned().collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_overlap() {
        assert_eq!(word_overlap("a b c", "a b c"), 1.0);
        assert_eq!(word_overlap("a b", "c d"), 0.0);
        assert!((word_overlap("Alpha beta", "alpha gamma") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(word_overlap("", ""), 0.0);
    }

    #[test]
    fn test_extract_keywords_filters_and_ranks() {
        let body = "The budget review: budget lines, review notes, budget. It is an ok plan";
        let keywords = extract_keywords(body, 3);
        assert_eq!(keywords, vec!["budget", "review", "lines"]);
    }

    #[test]
    fn test_extract_keywords_handles_unicode() {
        let keywords = extract_keywords("회의록 회의록 일정", 10);
        assert_eq!(keywords, vec!["회의록"]);
    }
}
