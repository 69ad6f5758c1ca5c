use crate::pipeline::entry::{LabelSet, LineOrigin, ResolvedEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Entries of one stream waiting to be pushed
#[derive(Debug, Clone)]
pub struct Batch {
    /// Unique batch ID, used in delivery logs
    pub id: Uuid,
    pub labels: LabelSet,
    pub entries: Vec<ResolvedEntry>,
    /// Sum of line lengths in bytes
    pub bytes: usize,
    pub created_at: Instant,
}

impl Batch {
    pub fn new(labels: LabelSet, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            labels,
            entries: Vec::new(),
            bytes: 0,
            created_at: now,
        }
    }

    pub fn push(&mut self, entry: ResolvedEntry) {
        self.bytes += entry.line.len();
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn origins(&self) -> impl Iterator<Item = &LineOrigin> {
        self.entries.iter().map(|e| &e.origin)
    }

    /// Wire payload for this batch. Stream labels win over external labels.
    pub fn to_push_request(&self, external_labels: &BTreeMap<String, String>) -> PushRequest {
        let mut stream = external_labels.clone();
        stream.extend(self.labels.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        PushRequest {
            streams: vec![PushStream {
                stream,
                values: self
                    .entries
                    .iter()
                    .map(|e| [unix_nanos(&e.timestamp), e.line.clone()])
                    .collect(),
            }],
        }
    }
}

/// `{"streams":[{"stream":{...},"values":[["<unix ns>","<line>"]]}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub streams: Vec<PushStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStream {
    pub stream: BTreeMap<String, String>,
    pub values: Vec<[String; 2]>,
}

impl PushRequest {
    pub fn entry_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

fn unix_nanos(ts: &DateTime<Utc>) -> String {
    match ts.timestamp_nanos_opt() {
        Some(nanos) => nanos.to_string(),
        None => format!("{}{:09}", ts.timestamp(), ts.timestamp_subsec_nanos()),
    }
}
