use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::{Result, VaultError};
use crate::frontmatter::{Frontmatter, FrontmatterParser};
use crate::note::{Link, LinkKind};

/// File extensions indexed as notes.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown"];

static WIKILINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());
static MARKDOWN_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)]+)\)").unwrap());
static INLINE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w&])#([\p{L}\p{N}_/-]+)").unwrap());
static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+)$").unwrap());

/// Everything derived from one document's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub frontmatter: Frontmatter,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub links: Vec<Link>,
}

pub fn is_document_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|ext| e.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Parse raw file bytes into a document. Only undecodable bytes are an error;
/// a broken metadata block degrades to "no metadata".
pub fn parse_document(path: &Path, bytes: &[u8]) -> Result<ParsedDocument> {
    let content = std::str::from_utf8(bytes).map_err(|e| VaultError::Parse {
        path: path.to_path_buf(),
        reason: format!("content is not valid UTF-8: {}", e),
    })?;

    let (frontmatter, body) = FrontmatterParser::parse(content);
    let body = body.trim().to_string();

    let links = extract_links(&body);

    let mut tags: Vec<String> = Vec::new();
    for tag in frontmatter
        .tags
        .iter()
        .cloned()
        .chain(extract_inline_tags(&body))
    {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let title = extract_title(&frontmatter, &body, path);

    Ok(ParsedDocument {
        frontmatter,
        title,
        body,
        tags,
        links,
    })
}

/// Metadata title, else first heading, else the file stem.
pub fn extract_title(frontmatter: &Frontmatter, body: &str, path: &Path) -> String {
    if let Some(title) = frontmatter.title.as_deref().map(str::trim) {
        if !title.is_empty() {
            return title.to_string();
        }
    }

    if let Some(caps) = HEADING_RE.captures(body) {
        let heading = caps[1].trim().trim_end_matches('#').trim();
        if !heading.is_empty() {
            return heading.to_string();
        }
    }

    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Links in document order. Wikilinks are always internal; markdown links are
/// external when the target carries a URL scheme or starts with `//`.
pub fn extract_links(body: &str) -> Vec<Link> {
    let mut found: Vec<(usize, Link)> = Vec::new();

    for caps in WIKILINK_RE.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        let inner = &caps[1];
        let (target, display) = match inner.split_once('|') {
            Some((t, d)) => (t.trim(), d.trim()),
            None => (inner.trim(), inner.trim()),
        };
        if target.is_empty() {
            continue;
        }
        found.push((
            whole.start(),
            Link {
                kind: LinkKind::Internal,
                target: target.to_string(),
                display_text: if display.is_empty() { target } else { display }.to_string(),
                resolved_path: Some(target.to_string()),
            },
        ));
    }

    // Blank out wikilinks with same-length padding so `[[a]](b)` is not read
    // twice and byte offsets stay comparable.
    let masked = WIKILINK_RE.replace_all(body, |caps: &regex::Captures| " ".repeat(caps[0].len()));

    for caps in MARKDOWN_LINK_RE.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else { continue };
        let is_embed = !caps[1].is_empty();
        let target = clean_link_target(&caps[3]);
        if target.is_empty() {
            continue;
        }
        let display = caps[2].trim();
        let display_text = if display.is_empty() { target.clone() } else { display.to_string() };

        let kind = if is_external_target(&target) {
            LinkKind::External
        } else if is_embed {
            LinkKind::Attachment
        } else {
            LinkKind::Internal
        };
        let resolved_path = (kind == LinkKind::Internal).then(|| target.clone());

        found.push((
            whole.start(),
            Link {
                kind,
                target,
                display_text,
                resolved_path,
            },
        ));
    }

    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, link)| link).collect()
}

/// Inline `#tag` markers, in order of first appearance.
pub fn extract_inline_tags(body: &str) -> Vec<String> {
    // Anchors inside links (`[[Note#Heading]]`, `[x](#top)`) are not tags
    let without_wikilinks = WIKILINK_RE.replace_all(body, " ");
    let text = MARKDOWN_LINK_RE.replace_all(&without_wikilinks, " ");

    let mut tags: Vec<String> = Vec::new();
    for caps in INLINE_TAG_RE.captures_iter(&text) {
        let tag = caps[1].trim_end_matches(['/', '-']);
        // Purely numeric markers are issue references, not tags
        if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn clean_link_target(raw: &str) -> String {
    let first = raw.split_whitespace().next().unwrap_or("");
    first
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn is_external_target(target: &str) -> bool {
    if target.starts_with("//") {
        return true;
    }
    match url::Url::parse(target) {
        // A single-letter scheme is a Windows drive (`C:\notes\a.md`)
        Ok(url) => url.scheme().len() > 1,
        Err(_) => false,
    }
}
