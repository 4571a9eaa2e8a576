pub mod types;

pub use types::{normalize_tags, Frontmatter};

use crate::error::Result;

pub struct FrontmatterParser;

impl FrontmatterParser {
    /// Split a leading `---` delimited block from the body.
    /// Returns `(None, content)` when there is no complete block.
    pub fn split(content: &str) -> (Option<&str>, &str) {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        let first_line_end = match content.find('\n') {
            Some(idx) => idx,
            None => return (None, content),
        };
        if content[..first_line_end].trim_end() != "---" {
            return (None, content);
        }

        // Find the closing --- on a line of its own
        let yaml_start = first_line_end + 1;
        let mut line_start = yaml_start;
        while line_start <= content.len() {
            let line_end = content[line_start..]
                .find('\n')
                .map(|i| line_start + i)
                .unwrap_or(content.len());
            if content[line_start..line_end].trim_end() == "---" {
                let yaml = &content[yaml_start..line_start];
                let body_start = (line_end + 1).min(content.len());
                return (Some(yaml), &content[body_start..]);
            }
            if line_end == content.len() {
                break;
            }
            line_start = line_end + 1;
        }

        // No closing ---, treat as no frontmatter
        (None, content)
    }

    /// Parse a markdown document into frontmatter and body.
    /// A block that is not a YAML mapping falls back to "whole file is body".
    pub fn parse(content: &str) -> (Frontmatter, String) {
        let (yaml, body) = Self::split(content);
        match yaml {
            Some(yaml) if yaml.trim().is_empty() => (Frontmatter::default(), body.to_string()),
            Some(yaml) => match Self::parse_yaml(yaml) {
                Ok(frontmatter) => (frontmatter, body.to_string()),
                Err(e) => {
                    log::debug!("[frontmatter] Ignoring malformed metadata block: {}", e);
                    (Frontmatter::default(), content.to_string())
                }
            },
            None => (Frontmatter::default(), content.to_string()),
        }
    }

    /// Parse only the frontmatter from YAML string
    pub fn parse_yaml(yaml_str: &str) -> std::result::Result<Frontmatter, serde_yaml::Error> {
        serde_yaml::from_str::<Frontmatter>(yaml_str)
    }

    /// Serialize frontmatter to YAML string
    pub fn to_yaml(frontmatter: &Frontmatter) -> Result<String> {
        Ok(serde_yaml::to_string(frontmatter)?)
    }

    /// Combine frontmatter and body into markdown content
    pub fn combine(frontmatter: Option<&Frontmatter>, body: &str) -> Result<String> {
        match frontmatter {
            Some(fm) if !fm.is_empty() => {
                let yaml = Self::to_yaml(fm)?;
                Ok(format!("---\n{}\n---\n\n{}", yaml.trim(), body))
            }
            _ => Ok(body.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    #[test]
    fn test_parse_with_frontmatter() {
        let content = r##"---
title: "Test Note"
tags: [work, "#planning"]
created: 2025-01-24
status: draft
---

This is the body content."##;

        let (fm, body) = FrontmatterParser::parse(content);
        assert_eq!(fm.title.as_deref(), Some("Test Note"));
        assert_eq!(fm.tags, vec!["work", "planning"]);
        assert_eq!(fm.created.as_deref(), Some("2025-01-24"));
        assert_eq!(fm.extra.get("status"), Some(&Value::String("draft".into())));
        assert_eq!(body.trim(), "This is the body content.");
    }

    #[test]
    fn test_parse_without_frontmatter() {
        let content = "Just some markdown content.";
        let (fm, body) = FrontmatterParser::parse(content);
        assert!(fm.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn test_malformed_block_falls_back_to_body() {
        let content = "---\ntitle: [unclosed\n---\nBody";
        let (fm, body) = FrontmatterParser::parse(content);
        assert!(fm.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn test_non_mapping_block_falls_back_to_body() {
        let content = "---\n- just\n- a list\n---\nBody";
        let (fm, body) = FrontmatterParser::parse(content);
        assert!(fm.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn test_unclosed_block_is_body() {
        let content = "---\ntitle: Open\nno closing line";
        let (fm, body) = FrontmatterParser::parse(content);
        assert!(fm.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn test_comma_separated_tags() {
        let (fm, _) = FrontmatterParser::parse("---\ntags: work, ideas, work\n---\nx");
        assert_eq!(fm.tags, vec!["work", "ideas"]);
    }

    #[test]
    fn test_numeric_title_is_accepted() {
        let (fm, _) = FrontmatterParser::parse("---\ntitle: 2024\n---\nx");
        assert_eq!(fm.title.as_deref(), Some("2024"));
    }

    #[test]
    fn test_combine_round_trips_extra_keys() {
        let mut fm = Frontmatter {
            title: Some("Test".to_string()),
            tags: vec!["a".to_string()],
            ..Default::default()
        };
        fm.merge_value("priority", Value::String("high".into()));

        let combined = FrontmatterParser::combine(Some(&fm), "Content here.").unwrap();
        assert!(combined.starts_with("---\n"));
        assert!(combined.ends_with("---\n\nContent here."));

        let (parsed, body) = FrontmatterParser::parse(&combined);
        assert_eq!(parsed, fm);
        assert_eq!(body.trim(), "Content here.");
    }

    #[test]
    fn test_combine_without_metadata_is_plain_body() {
        let combined = FrontmatterParser::combine(Some(&Frontmatter::default()), "plain").unwrap();
        assert_eq!(combined, "plain");
    }

    #[test]
    fn test_merge_value_routes_known_keys() {
        let mut fm = Frontmatter::default();
        fm.merge_value("tags", Value::String("x y".into()));
        fm.merge_value("title", Value::String("Renamed".into()));
        assert_eq!(fm.tags, vec!["x", "y"]);
        assert_eq!(fm.title.as_deref(), Some("Renamed"));
        assert!(fm.extra.is_empty());
    }
}
