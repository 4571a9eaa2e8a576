use std::collections::{BTreeMap, HashMap};

use crate::note::{Backlink, Note, NoteId};

/// Backlink relation derived from the notes' internal links. Always rebuilt
/// in full; never patched incrementally.
#[derive(Debug, Default, Clone)]
pub struct BacklinkGraph {
    /// target -> (source path -> entry), so each source appears once per target
    backlinks: HashMap<NoteId, BTreeMap<String, Backlink>>,
    /// source -> resolved target per link position (`None` for external,
    /// attachment and dangling links)
    resolved: HashMap<NoteId, Vec<Option<NoteId>>>,
}

/// Title/stem/id lookup valid for one rebuild pass.
struct LinkResolver<'a> {
    by_title: HashMap<&'a str, &'a Note>,
    by_stem: HashMap<String, &'a Note>,
    by_id: &'a HashMap<NoteId, Note>,
}

impl<'a> LinkResolver<'a> {
    fn new(notes: &'a HashMap<NoteId, Note>) -> Self {
        let mut ordered: Vec<&Note> = notes.values().collect();
        ordered.sort_by(|a, b| a.path.cmp(&b.path));

        // Iterating in path order makes the first insert the lexicographically smallest path
        let mut by_title: HashMap<&str, &Note> = HashMap::with_capacity(ordered.len());
        let mut by_stem: HashMap<String, &Note> = HashMap::with_capacity(ordered.len());
        for note in ordered {
            by_title.entry(note.title.as_str()).or_insert(note);
            by_stem.entry(note.stem().to_string()).or_insert(note);
        }

        Self {
            by_title,
            by_stem,
            by_id: notes,
        }
    }

    fn resolve(&self, target: &str) -> Option<&'a Note> {
        let without_anchor = target.split('#').next().unwrap_or("").trim();
        if without_anchor.is_empty() {
            return None;
        }

        if let Some(note) = self.by_title.get(without_anchor) {
            return Some(*note);
        }
        if let Some(note) = self.by_stem.get(&link_stem(without_anchor)) {
            return Some(*note);
        }
        self.by_id.get(&NoteId::from(target))
    }
}

/// Last path component of a link target with the document extension removed.
pub fn link_stem(target: &str) -> String {
    let decoded = target.replace("%20", " ");
    let last = decoded
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(decoded.as_str())
        .trim();

    let lower = last.to_ascii_lowercase();
    for ext in [".markdown", ".md"] {
        if lower.ends_with(ext) {
            return last[..last.len() - ext.len()].to_string();
        }
    }
    last.to_string()
}

impl BacklinkGraph {
    pub fn build(notes: &HashMap<NoteId, Note>) -> Self {
        let resolver = LinkResolver::new(notes);
        let mut backlinks: HashMap<NoteId, BTreeMap<String, Backlink>> = HashMap::new();
        let mut resolved: HashMap<NoteId, Vec<Option<NoteId>>> = HashMap::with_capacity(notes.len());

        for source in notes.values() {
            let mut targets = Vec::with_capacity(source.links.len());
            for link in &source.links {
                if !link.is_internal() {
                    targets.push(None);
                    continue;
                }
                match resolver.resolve(&link.target) {
                    Some(target) => {
                        backlinks
                            .entry(target.id.clone())
                            .or_default()
                            .entry(source.path.clone())
                            .or_insert_with(|| Backlink {
                                from_note_title: source.title.clone(),
                                from_note_path: source.path.clone(),
                            });
                        targets.push(Some(target.id.clone()));
                    }
                    None => targets.push(None),
                }
            }
            resolved.insert(source.id.clone(), targets);
        }

        Self { backlinks, resolved }
    }

    /// Backlink entries of `id`, ordered by source path.
    pub fn backlinks_of(&self, id: &NoteId) -> Vec<Backlink> {
        self.backlinks
            .get(id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolved target of the `index`-th link of `source`.
    pub fn resolved_link(&self, source: &NoteId, index: usize) -> Option<&NoteId> {
        self.resolved
            .get(source)
            .and_then(|targets| targets.get(index))
            .and_then(Option::as_ref)
    }

    /// Distinct resolved targets of `source`, in link order.
    pub fn forward_targets(&self, source: &NoteId) -> Vec<NoteId> {
        let mut out: Vec<NoteId> = Vec::new();
        if let Some(targets) = self.resolved.get(source) {
            for target in targets.iter().flatten() {
                if !out.contains(target) {
                    out.push(target.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_stem() {
        assert_eq!(link_stem("notes/Project Plan.md"), "Project Plan");
        assert_eq!(link_stem("Idea.MARKDOWN"), "Idea");
        assert_eq!(link_stem("sub\\Win.md"), "Win");
        assert_eq!(link_stem("My%20Note.md"), "My Note");
        assert_eq!(link_stem("Plain"), "Plain");
    }
}
