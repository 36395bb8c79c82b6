//! Metric tags and canonical metric identity.
//!
//! An identity is the canonical string `name[;tag1[:v1],tag2[:v2],...]`
//! with tags sorted by name; equality, hashing and ordering all go
//! through that string. The pieces are stored behind shared `Arc`s so
//! cloning an identity onto the aggregate path never allocates.

use crate::core::{KoosteError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Characters that would break the canonical grammar.
const RESERVED: [char; 3] = [':', ',', ';'];

/// A single `name` or `name:value` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricTag {
    name: String,
    value: Option<String>,
}

impl MetricTag {
    /// Build a tag from pre-split parts. Both parts are trimmed and
    /// checked against the reserved characters.
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Result<Self> {
        let name = name.into().trim().to_owned();
        let value = value.map(|v| v.into().trim().to_owned());
        if name.is_empty() {
            return Err(KoosteError::InvalidTag {
                part: name,
                reason: "tag name is empty".to_owned(),
            });
        }
        for part in std::iter::once(&name).chain(value.iter()) {
            if part.contains(&RESERVED[..]) {
                return Err(KoosteError::InvalidTag {
                    part: part.clone(),
                    reason: "':', ',' and ';' are reserved".to_owned(),
                });
            }
        }
        Ok(Self { name, value })
    }

    /// Parse a single `name` or `name:value` segment.
    pub fn parse(segment: &str) -> Result<Self> {
        match segment.split_once(':') {
            Some((name, value)) => Self::new(name, Some(value)),
            None => Self::new(segment, None::<&str>),
        }
    }

    /// Parse a comma-separated tag list, ignoring empty segments.
    pub fn parse_many(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag value; `None` for a bare tag, `Some("")` for `name:`.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn write_canonical(&self, out: &mut String) {
        out.push_str(&self.name);
        if let Some(value) = &self.value {
            out.push(':');
            out.push_str(value);
        }
    }
}

impl fmt::Display for MetricTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}:{}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// Canonical identity of a metric: name plus sorted tags.
#[derive(Debug, Clone)]
pub struct MetricIdentity {
    name: Arc<str>,
    tags: Arc<[MetricTag]>,
    canonical: Arc<str>,
}

impl MetricIdentity {
    /// Build an identity. Tags are sorted by name; the canonical string
    /// is computed once and stored.
    pub fn new(name: impl Into<String>, mut tags: Vec<MetricTag>) -> Result<Self> {
        let name = name.into().trim().to_owned();
        if name.is_empty() || name.contains(&[',', ';'][..]) {
            return Err(KoosteError::InvalidName(name));
        }
        tags.sort_by(|a, b| a.name.cmp(&b.name));

        let mut canonical = name.clone();
        for (i, tag) in tags.iter().enumerate() {
            canonical.push(if i == 0 { ';' } else { ',' });
            tag.write_canonical(&mut canonical);
        }

        Ok(Self {
            name: name.into(),
            tags: tags.into(),
            canonical: canonical.into(),
        })
    }

    /// Identity with no tags.
    pub fn plain(name: impl Into<String>) -> Result<Self> {
        Self::new(name, Vec::new())
    }

    /// Metric name without tags.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags in canonical (name-sorted) order.
    pub fn tags(&self) -> &[MetricTag] {
        &self.tags
    }

    /// The full canonical string.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for MetricIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for MetricIdentity {}

impl Hash for MetricIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for MetricIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetricIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
