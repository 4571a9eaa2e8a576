use serde::Serialize;

use crate::index::IndexSnapshot;
use crate::note::Note;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Width of the excerpt window around the first body match, in characters.
pub const CONTEXT_LENGTH: usize = 100;

const TITLE_WEIGHT: u32 = 10;
const TAG_WEIGHT: u32 = 8;
const BODY_WEIGHT: u32 = 5;
const METADATA_WEIGHT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Title,
    Tags,
    Content,
    Metadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub note: Note,
    pub relevance: u32,
    pub matched_fields: Vec<MatchField>,
    pub context: String,
}

/// Whole-document substring scoring over an index snapshot.
pub struct SearchEngine;

impl SearchEngine {
    /// Score every note against `query` and return the best `limit` hits.
    /// Equal scores keep index iteration order (path order).
    pub fn search(snapshot: &IndexSnapshot, query: &str, limit: usize) -> Vec<SearchResult> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<SearchResult> = snapshot
            .iter()
            .filter_map(|note| {
                let (relevance, matched_fields) = Self::score(note, &query);
                if relevance == 0 {
                    return None;
                }
                Some(SearchResult {
                    note: note.clone(),
                    relevance,
                    matched_fields,
                    context: extract_context(&note.body, &query, CONTEXT_LENGTH),
                })
            })
            .collect();

        // Stable sort keeps path order among equal scores
        results.sort_by(|a, b| b.relevance.cmp(&a.relevance));
        results.truncate(limit);

        log::debug!("[search] {:?} -> {} results", query, results.len());
        results
    }

    /// `query` must already be lowercased.
    pub fn score(note: &Note, query: &str) -> (u32, Vec<MatchField>) {
        let mut relevance = 0;
        let mut matched = Vec::new();

        if note.title.to_lowercase().contains(query) {
            relevance += TITLE_WEIGHT;
            matched.push(MatchField::Title);
        }
        if note.tags.iter().any(|t| t.to_lowercase().contains(query)) {
            relevance += TAG_WEIGHT;
            matched.push(MatchField::Tags);
        }
        if note.body.to_lowercase().contains(query) {
            relevance += BODY_WEIGHT;
            matched.push(MatchField::Content);
        }
        if !note.metadata.is_empty() {
            let metadata = serde_json::to_string(&note.metadata).unwrap_or_default();
            if metadata.to_lowercase().contains(query) {
                relevance += METADATA_WEIGHT;
                matched.push(MatchField::Metadata);
            }
        }

        (relevance, matched)
    }
}

/// Excerpt of `text` around the first case-insensitive occurrence of `query`,
/// pulled in to a `.` boundary when one falls in the outer half of the window.
/// Without a match the context is empty.
pub fn extract_context(text: &str, query: &str, context_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();

    // Lowercased characters with the index of the original char they came from
    let mut lower: Vec<char> = Vec::with_capacity(chars.len());
    let mut origin: Vec<usize> = Vec::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        for lc in c.to_lowercase() {
            lower.push(lc);
            origin.push(i);
        }
    }
    let needle: Vec<char> = query.to_lowercase().chars().collect();

    let found = if needle.is_empty() || needle.len() > lower.len() {
        None
    } else {
        lower.windows(needle.len()).position(|w| w == needle.as_slice())
    };

    let Some(pos) = found else {
        return String::new();
    };

    let match_start = origin[pos];
    let match_end = origin[pos + needle.len() - 1] + 1;
    let half = context_length / 2;

    let start = match_start.saturating_sub(half);
    let end = (match_end + half).min(chars.len());
    let mut window: &[char] = &chars[start..end];

    if start > 0 {
        if let Some(dot) = window.iter().position(|&c| c == '.') {
            let sentence_start = dot + 1;
            if sentence_start * 2 < window.len() {
                window = &window[sentence_start..];
            }
        }
    }

    if end < chars.len() {
        if let Some(dot) = window.iter().rposition(|&c| c == '.') {
            if dot * 2 > window.len() {
                window = &window[..=dot];
            }
        }
    }

    window.iter().collect::<String>().trim().to_string()
}
