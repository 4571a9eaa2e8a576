use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

// Scalars of any YAML type become strings; anything else is treated as absent
// so a numeric title or an unquoted date never invalidates the whole block.
fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_to_string(&value))
}

// Accepts a sequence, a comma/whitespace separated string, or null.
fn deserialize_tag_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(tag_list_from_value(&value))
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn tag_list_from_value(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Sequence(seq) => seq.iter().filter_map(scalar_to_string).collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect(),
        Value::Number(_) | Value::Bool(_) => scalar_to_string(value).into_iter().collect(),
        _ => Vec::new(),
    };

    normalize_tags(raw)
}

/// Trim, drop a leading `#`, skip empties and repeats.
pub fn normalize_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let clean = tag.as_ref().trim().trim_start_matches('#').trim().to_string();
        if !clean.is_empty() && !tags.contains(&clean) {
            tags.push(clean);
        }
    }
    tags
}

/// Metadata block of a note. Recognized fields are typed; every other key is
/// preserved verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_tag_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_tag_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aliases: Vec<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub modified: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Frontmatter {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tags.is_empty()
            && self.aliases.is_empty()
            && self.created.is_none()
            && self.modified.is_none()
            && self.extra.is_empty()
    }

    /// Set one key, routing recognized names to their typed field.
    pub fn merge_value(&mut self, key: &str, value: Value) {
        match key {
            "title" => self.title = scalar_to_string(&value),
            "tags" => self.tags = tag_list_from_value(&value),
            "aliases" => self.aliases = tag_list_from_value(&value),
            "created" => self.created = scalar_to_string(&value),
            "modified" => self.modified = scalar_to_string(&value),
            _ => {
                if value.is_null() {
                    self.extra.remove(key);
                } else {
                    self.extra.insert(key.to_string(), value);
                }
            }
        }
    }
}
