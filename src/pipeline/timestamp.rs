use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("failed to parse timestamp '{value}' with format '{format}': {source}")]
    ParseError {
        value: String,
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("timestamp '{value}' matches none of the default layouts")]
    NoLayoutMatched { value: String },

    #[error("timestamp '{value}' is out of range")]
    OutOfRange { value: String },
}

/// Layouts tried in order when a job sets no explicit format
const DEFAULT_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%d/%b/%Y:%H:%M:%S %z",
];

#[derive(Debug, Clone)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
    Auto,
}

#[derive(Debug, Clone)]
pub struct TimestampParser {
    format: TimestampFormat,
}

impl TimestampParser {
    /// `format` is a strptime format string, 'iso8601', 'epoch', 'epoch_ms', or None for auto-detection
    pub fn new(format: Option<&str>) -> Self {
        let format = match format {
            None => TimestampFormat::Auto,
            Some("iso8601") => TimestampFormat::Iso8601,
            Some("epoch") => TimestampFormat::Epoch,
            Some("epoch_ms") => TimestampFormat::EpochMs,
            Some(other) => TimestampFormat::Strptime(other.to_string()),
        };
        Self { format }
    }

    pub fn format(&self) -> &TimestampFormat {
        &self.format
    }

    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        let value = value.trim();
        match &self.format {
            TimestampFormat::Iso8601 => parse_iso8601(value),
            TimestampFormat::Epoch => parse_epoch(value),
            TimestampFormat::EpochMs => parse_epoch_ms(value),
            TimestampFormat::Strptime(fmt) => parse_strptime(value, fmt),
            TimestampFormat::Auto => parse_auto(value),
        }
    }
}

fn parse_auto(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(dt) = parse_iso8601(value) {
        return Ok(dt);
    }
    DEFAULT_LAYOUTS
        .iter()
        .find_map(|layout| parse_strptime(value, layout).ok())
        .ok_or_else(|| TimestampError::NoLayoutMatched {
            value: value.to_string(),
        })
}

fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimestampError::ParseError {
            value: value.to_string(),
            format: "iso8601".to_string(),
            source: Box::new(e),
        })
}

fn parse_epoch(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let seconds: i64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| TimestampError::ParseError {
            value: value.to_string(),
            format: "epoch".to_string(),
            source: Box::new(e),
        })?;

    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| TimestampError::OutOfRange {
            value: value.to_string(),
        })
}

fn parse_epoch_ms(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let millis: i64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| TimestampError::ParseError {
            value: value.to_string(),
            format: "epoch_ms".to_string(),
            source: Box::new(e),
        })?;

    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| TimestampError::OutOfRange {
            value: value.to_string(),
        })
}

fn parse_strptime(value: &str, format: &str) -> Result<DateTime<Utc>, TimestampError> {
    if format.contains("%z") || format.contains("%Z") || format.contains("%:z") {
        // Parse with timezone and convert to UTC
        DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| TimestampError::ParseError {
                value: value.to_string(),
                format: format.to_string(),
                source: Box::new(e),
            })
    } else {
        // Naive datetime, assumed UTC
        NaiveDateTime::parse_from_str(value, format)
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|e| TimestampError::ParseError {
                value: value.to_string(),
                format: format.to_string(),
                source: Box::new(e),
            })
    }
}
