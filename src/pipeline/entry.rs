use crate::source::file_id::FileId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Label set identifying a stream. Ordered so it can key batches and render stably.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Set a label, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    /// Drop `__`-prefixed labels used only for configuration
    pub fn strip_internal(&mut self) {
        self.0.retain(|name, _| !name.starts_with("__"));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        f.write_str("}")
    }
}

/// Where a line came from; used to acknowledge it once delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOrigin {
    pub file_id: FileId,
    pub epoch: u64,
    /// Byte position where the line begins
    pub offset: u64,
    /// Bytes consumed including the newline
    pub len: u64,
}

impl LineOrigin {
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len
    }
}

/// Static context shared by every line of one tailed file
#[derive(Debug, Clone)]
pub struct TailTarget {
    pub job: Arc<str>,
    pub path: PathBuf,
    /// Static labels from the scrape config plus `filename`
    pub labels: LabelSet,
}

/// A physical line as read by the tailer
#[derive(Debug, Clone)]
pub struct RawLine {
    pub target: Arc<TailTarget>,
    pub line: String,
    pub read_at: DateTime<Utc>,
    pub origin: LineOrigin,
}

/// A line while it moves through the pipeline stages
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub source_path: PathBuf,
    pub raw_line: String,
    /// Effective body; starts as the raw line and may be rewritten by output stages
    pub line: String,
    pub timestamp: DateTime<Utc>,
    pub labels: LabelSet,
    /// Named captures; scratch space discarded on resolution
    pub extracted: HashMap<String, String>,
    pub origin: LineOrigin,
}

impl LogEntry {
    pub fn from_raw(raw: RawLine) -> Self {
        let mut extracted = HashMap::new();
        extracted.insert(
            "filename".to_string(),
            raw.target.path.to_string_lossy().into_owned(),
        );

        Self {
            source_path: raw.target.path.clone(),
            line: raw.line.clone(),
            raw_line: raw.line,
            timestamp: raw.read_at,
            labels: raw.target.labels.clone(),
            extracted,
            origin: raw.origin,
        }
    }

    /// Look up a template reference: captures first, then labels set so far
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.extracted
            .get(name)
            .map(String::as_str)
            .or_else(|| self.labels.get(name))
    }
}

/// An entry that has left the pipeline; immutable from here on
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub labels: LabelSet,
    pub timestamp: DateTime<Utc>,
    pub line: String,
    pub origin: LineOrigin,
}
