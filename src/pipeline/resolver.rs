use crate::config::types::TimestampStageConfig;
use crate::pipeline::entry::{LogEntry, ResolvedEntry};
use crate::pipeline::stage::StageError;
use crate::pipeline::timestamp::{TimestampFormat, TimestampParser};
use chrono::format::{Item, StrftimeItems};

/// Capture promoted to a label when the pipeline did not set one
const LEVEL_FIELD: &str = "level";

/// Final pass fixing an entry's timestamp and label set
#[derive(Debug, Clone)]
pub struct Resolver {
    source: String,
    parser: TimestampParser,
}

impl Resolver {
    pub fn compile(config: &TimestampStageConfig) -> Result<Self, StageError> {
        let parser = TimestampParser::new(config.format.as_deref());

        if let TimestampFormat::Strptime(format) = parser.format() {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(StageError::InvalidTimestampFormat {
                    format: format.clone(),
                });
            }
        }

        Ok(Self {
            source: config.source.clone(),
            parser,
        })
    }

    pub fn resolve(&self, mut entry: LogEntry) -> ResolvedEntry {
        let raw_timestamp = entry
            .extracted
            .get(&self.source)
            .map(String::as_str)
            .or_else(|| entry.labels.get(&self.source));

        if let Some(raw) = raw_timestamp {
            match self.parser.parse(raw) {
                Ok(ts) => entry.timestamp = ts,
                Err(e) => {
                    tracing::debug!(
                        path = %entry.source_path.display(),
                        error = %e,
                        "Unparseable timestamp, keeping read time"
                    );
                }
            }
        }

        if !entry.labels.contains(LEVEL_FIELD) {
            if let Some(level) = entry.extracted.get(LEVEL_FIELD).filter(|l| !l.is_empty()) {
                entry.labels.insert(LEVEL_FIELD, level.clone());
            }
        }

        entry.labels.strip_internal();

        ResolvedEntry {
            labels: entry.labels,
            timestamp: entry.timestamp,
            line: entry.line,
            origin: entry.origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entry::{LineOrigin, RawLine, TailTarget};
    use crate::source::file_id::FileId;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn entry(line: &str) -> LogEntry {
        let labels = [("__path__", "/var/log/*.log"), ("job", "bot")]
            .into_iter()
            .collect();
        LogEntry::from_raw(RawLine {
            target: Arc::new(TailTarget {
                job: Arc::from("bot"),
                path: PathBuf::from("/var/log/bot.log"),
                labels,
            }),
            line: line.to_string(),
            read_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            origin: LineOrigin {
                file_id: FileId::new(1, 2),
                epoch: 0,
                offset: 0,
                len: 1,
            },
        })
    }

    fn resolver(format: Option<&str>) -> Resolver {
        Resolver::compile(&TimestampStageConfig {
            source: "timestamp".to_string(),
            format: format.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn test_timestamp_capture_becomes_entry_time() {
        let mut e = entry("x");
        e.extracted
            .insert("timestamp".to_string(), "2024-01-01 10:00:00,123".to_string());
        let resolved = resolver(Some("%Y-%m-%d %H:%M:%S,%3f")).resolve(e);
        assert_eq!(resolved.timestamp.to_rfc3339(), "2024-01-01T10:00:00.123+00:00");
    }

    #[test]
    fn test_missing_or_bad_timestamp_keeps_read_time() {
        let read_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let resolved = resolver(None).resolve(entry("x"));
        assert_eq!(resolved.timestamp, read_at);

        let mut e = entry("x");
        e.extracted
            .insert("timestamp".to_string(), "not a time".to_string());
        let resolved = resolver(None).resolve(e);
        assert_eq!(resolved.timestamp, read_at);
    }

    #[test]
    fn test_level_capture_promoted_and_internal_labels_stripped() {
        let mut e = entry("x");
        e.extracted.insert("level".to_string(), "ERROR".to_string());
        let resolved = resolver(None).resolve(e);
        assert_eq!(resolved.labels.get("level"), Some("ERROR"));
        assert_eq!(resolved.labels.get("job"), Some("bot"));
        assert!(!resolved.labels.contains("__path__"));
    }

    #[test]
    fn test_explicit_level_label_wins() {
        let mut e = entry("x");
        e.extracted.insert("level".to_string(), "ERROR".to_string());
        e.labels.insert("level", "error");
        let resolved = resolver(None).resolve(e);
        assert_eq!(resolved.labels.get("level"), Some("error"));
    }

    #[test]
    fn test_invalid_strptime_format_rejected() {
        let result = Resolver::compile(&TimestampStageConfig {
            source: "timestamp".to_string(),
            format: Some("%Y-%Q".to_string()),
        });
        assert!(matches!(
            result,
            Err(StageError::InvalidTimestampFormat { .. })
        ));
    }
}
