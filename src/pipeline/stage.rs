use crate::config::types::{MatchStageConfig, OutputStageConfig, RegexStageConfig, StageConfig};
use crate::pipeline::entry::LogEntry;
use crate::pipeline::template::{Template, TemplateError};
use regex::Regex;
use thiserror::Error;

/// Error type for stage compilation
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage {index}: regex compilation error for pattern '{pattern}': {source}")]
    RegexCompilation {
        index: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("stage {index}: regex '{pattern}' has no named capture groups")]
    NoNamedCaptures { index: String, pattern: String },

    #[error("stage {index}: {source}")]
    Template {
        index: String,
        #[source]
        source: TemplateError,
    },

    #[error("stage {index}: invalid label name '{name}'")]
    InvalidLabelName { index: String, name: String },

    #[error("stage {index}: output stage needs a source or a template")]
    EmptyOutput { index: String },

    #[error("stage {index}: match stage has no conditions")]
    UnconditionalMatch { index: String },

    #[error("invalid timestamp format '{format}'")]
    InvalidTimestampFormat { format: String },
}

#[derive(Debug)]
pub enum Stage {
    Regex(RegexStage),
    Labels(LabelsStage),
    Output(OutputStage),
    Match(MatchStage),
}

impl Stage {
    /// Compile one stage; `index` is its position for error messages (e.g. "2" or "3.1")
    pub fn compile(index: &str, config: &StageConfig) -> Result<Self, StageError> {
        match config {
            StageConfig::Regex(cfg) => RegexStage::compile(index, cfg).map(Stage::Regex),
            StageConfig::Labels(mapping) => {
                let mut labels = Vec::with_capacity(mapping.len());
                for (name, template) in mapping {
                    if !is_label_name(name) {
                        return Err(StageError::InvalidLabelName {
                            index: index.to_string(),
                            name: name.clone(),
                        });
                    }
                    let template = match template.as_deref() {
                        None | Some("") => Template::field(name),
                        Some(text) => Template::parse(text).map_err(|source| {
                            StageError::Template {
                                index: index.to_string(),
                                source,
                            }
                        })?,
                    };
                    labels.push((name.clone(), template));
                }
                Ok(Stage::Labels(LabelsStage { labels }))
            }
            StageConfig::Output(cfg) => OutputStage::compile(index, cfg).map(Stage::Output),
            StageConfig::Match(cfg) => MatchStage::compile(index, cfg).map(Stage::Match),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Regex(_) => "regex",
            Stage::Labels(_) => "labels",
            Stage::Output(_) => "output",
            Stage::Match(_) => "match",
        }
    }

    pub fn apply(&self, entry: &mut LogEntry) {
        match self {
            Stage::Regex(stage) => stage.apply(entry),
            Stage::Labels(stage) => stage.apply(entry),
            Stage::Output(stage) => stage.apply(entry),
            Stage::Match(stage) => stage.apply(entry),
        }
    }
}

#[derive(Debug)]
pub struct RegexStage {
    regex: Regex,
    source: Option<String>,
}

impl RegexStage {
    fn compile(index: &str, config: &RegexStageConfig) -> Result<Self, StageError> {
        let regex =
            Regex::new(&config.expression).map_err(|source| StageError::RegexCompilation {
                index: index.to_string(),
                pattern: config.expression.clone(),
                source,
            })?;

        if regex.capture_names().flatten().next().is_none() {
            return Err(StageError::NoNamedCaptures {
                index: index.to_string(),
                pattern: config.expression.clone(),
            });
        }

        Ok(Self {
            regex,
            source: config.source.clone(),
        })
    }

    fn apply(&self, entry: &mut LogEntry) {
        let input = match &self.source {
            None => entry.line.as_str(),
            Some(field) => match entry.extracted.get(field) {
                Some(value) => value.as_str(),
                None => {
                    tracing::trace!(source = %field, "regex source field not set, skipping");
                    return;
                }
            },
        };

        let Some(captures) = self.regex.captures(input) else {
            tracing::trace!(pattern = %self.regex.as_str(), "regex did not match");
            return;
        };

        let found: Vec<(String, String)> = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        entry.extracted.extend(found);
    }
}

#[derive(Debug)]
pub struct LabelsStage {
    labels: Vec<(String, Template)>,
}

impl LabelsStage {
    fn apply(&self, entry: &mut LogEntry) {
        for (name, template) in &self.labels {
            let value = template.render(|field| entry.lookup(field));
            // Empty label values cannot be shipped, so an empty render means absent
            if value.is_empty() {
                if entry.labels.remove(name).is_some() {
                    tracing::trace!(label = %name, template = %template.as_str(), "label rendered empty, removed");
                }
            } else {
                entry.labels.insert(name.clone(), value);
            }
        }
    }
}

#[derive(Debug)]
pub struct OutputStage {
    source: Option<String>,
    template: Option<Template>,
}

impl OutputStage {
    fn compile(index: &str, config: &OutputStageConfig) -> Result<Self, StageError> {
        let template = config
            .template
            .as_deref()
            .map(Template::parse)
            .transpose()
            .map_err(|source| StageError::Template {
                index: index.to_string(),
                source,
            })?;

        if template.is_none() && config.source.is_none() {
            return Err(StageError::EmptyOutput {
                index: index.to_string(),
            });
        }

        Ok(Self {
            source: config.source.clone(),
            template,
        })
    }

    fn apply(&self, entry: &mut LogEntry) {
        let rewritten = match (&self.template, &self.source) {
            (Some(template), _) => Some(template.render(|field| entry.lookup(field))),
            (None, Some(source)) => entry.extracted.get(source).cloned(),
            (None, None) => None,
        };

        if let Some(line) = rewritten {
            entry.line = line;
        }
    }
}

/// Runs nested stages only when the extraction context satisfies its conditions
#[derive(Debug)]
pub struct MatchStage {
    present: Vec<String>,
    absent: Vec<String>,
    stages: Vec<Stage>,
}

impl MatchStage {
    fn compile(index: &str, config: &MatchStageConfig) -> Result<Self, StageError> {
        if config.present.is_empty() && config.absent.is_empty() {
            return Err(StageError::UnconditionalMatch {
                index: index.to_string(),
            });
        }

        let stages = config
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| Stage::compile(&format!("{}.{}", index, i), stage))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            present: config.present.clone(),
            absent: config.absent.clone(),
            stages,
        })
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.present.iter().all(|f| entry.extracted.contains_key(f))
            && self.absent.iter().all(|f| !entry.extracted.contains_key(f))
    }

    fn apply(&self, entry: &mut LogEntry) {
        if self.matches(entry) {
            for stage in &self.stages {
                stage.apply(entry);
            }
        }
    }
}

/// Label names follow the sink's rules: `[a-zA-Z_][a-zA-Z0-9_]*`
fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entry::{LineOrigin, RawLine, TailTarget};
    use crate::source::file_id::FileId;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn entry(line: &str) -> LogEntry {
        let target = Arc::new(TailTarget {
            job: Arc::from("test"),
            path: PathBuf::from("/var/log/app.log"),
            labels: Default::default(),
        });
        LogEntry::from_raw(RawLine {
            target,
            line: line.to_string(),
            read_at: Utc::now(),
            origin: LineOrigin {
                file_id: FileId::new(1, 1),
                epoch: 0,
                offset: 0,
                len: line.len() as u64 + 1,
            },
        })
    }

    fn regex(expression: &str, source: Option<&str>) -> Stage {
        Stage::compile(
            "0",
            &StageConfig::Regex(RegexStageConfig {
                expression: expression.to_string(),
                source: source.map(str::to_string),
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_regex_merges_captures_and_overwrites() {
        let mut e = entry("level=WARN msg=disk");
        e.extracted.insert("level".to_string(), "INFO".to_string());

        regex(r"level=(?P<level>\w+) msg=(?P<msg>\w+)", None).apply(&mut e);

        assert_eq!(e.extracted["level"], "WARN");
        assert_eq!(e.extracted["msg"], "disk");
    }

    #[test]
    fn test_regex_no_match_is_noop() {
        let mut e = entry("something else");
        let before = e.extracted.clone();
        regex(r"^level=(?P<level>\w+)", None).apply(&mut e);
        assert_eq!(e.extracted, before);
    }

    #[test]
    fn test_regex_skips_non_participating_groups() {
        let mut e = entry("order 42");
        regex(r"order (?P<id>\d+)(?: by (?P<user>\w+))?", None).apply(&mut e);
        assert_eq!(e.extracted["id"], "42");
        assert!(!e.extracted.contains_key("user"));
    }

    #[test]
    fn test_regex_on_missing_source_is_noop() {
        let mut e = entry("anything");
        regex(r"(?P<x>.+)", Some("message")).apply(&mut e);
        assert!(!e.extracted.contains_key("x"));
    }

    #[test]
    fn test_regex_reads_filename_source() {
        let mut e = entry("anything");
        regex(r"/(?P<name>[^/]+)\.log$", Some("filename")).apply(&mut e);
        assert_eq!(e.extracted["name"], "app");
    }

    #[test]
    fn test_regex_without_named_groups_rejected() {
        let result = Stage::compile(
            "4",
            &StageConfig::Regex(RegexStageConfig {
                expression: r"^\d+$".to_string(),
                source: None,
            }),
        );
        assert!(matches!(result, Err(StageError::NoNamedCaptures { .. })));
    }

    #[test]
    fn test_labels_null_template_uses_same_name() {
        let mut mapping = BTreeMap::new();
        mapping.insert("level".to_string(), None);
        mapping.insert("svc".to_string(), Some("{{ .service }}".to_string()));
        let stage = Stage::compile("0", &StageConfig::Labels(mapping)).unwrap();

        let mut e = entry("x");
        e.extracted.insert("level".to_string(), "INFO".to_string());
        e.extracted.insert("service".to_string(), "api".to_string());
        stage.apply(&mut e);

        assert_eq!(e.labels.get("level"), Some("INFO"));
        assert_eq!(e.labels.get("svc"), Some("api"));
    }

    #[test]
    fn test_labels_empty_render_sets_nothing() {
        let mut mapping = BTreeMap::new();
        mapping.insert("trading_pair".to_string(), None);
        let stage = Stage::compile("0", &StageConfig::Labels(mapping)).unwrap();

        let mut e = entry("x");
        stage.apply(&mut e);
        assert!(!e.labels.contains("trading_pair"));
    }

    #[test]
    fn test_labels_empty_render_removes_earlier_value() {
        let mut first = BTreeMap::new();
        first.insert("svc".to_string(), Some("stale".to_string()));
        let mut second = BTreeMap::new();
        second.insert("svc".to_string(), Some("{{ .never_set }}".to_string()));
        let set = Stage::compile("0", &StageConfig::Labels(first)).unwrap();
        let clear = Stage::compile("1", &StageConfig::Labels(second)).unwrap();

        let mut e = entry("x");
        set.apply(&mut e);
        assert_eq!(e.labels.get("svc"), Some("stale"));
        clear.apply(&mut e);
        assert_eq!(e.labels.get("svc"), None);
    }

    #[test]
    fn test_invalid_label_name_rejected() {
        let mut mapping = BTreeMap::new();
        mapping.insert("trading-pair".to_string(), None);
        let result = Stage::compile("1", &StageConfig::Labels(mapping));
        assert!(matches!(result, Err(StageError::InvalidLabelName { .. })));
    }

    #[test]
    fn test_output_from_source_and_template() {
        let mut e = entry("raw");
        e.extracted.insert("message".to_string(), "hello".to_string());
        e.extracted.insert("level".to_string(), "INFO".to_string());

        let from_source = Stage::compile(
            "0",
            &StageConfig::Output(OutputStageConfig {
                source: Some("message".to_string()),
                template: None,
            }),
        )
        .unwrap();
        from_source.apply(&mut e);
        assert_eq!(e.line, "hello");
        assert_eq!(e.raw_line, "raw");

        let templated = Stage::compile(
            "1",
            &StageConfig::Output(OutputStageConfig {
                source: None,
                template: Some("{{ .level }}: {{ .message }}".to_string()),
            }),
        )
        .unwrap();
        templated.apply(&mut e);
        assert_eq!(e.line, "INFO: hello");
    }

    #[test]
    fn test_output_missing_source_keeps_line() {
        let mut e = entry("raw");
        let stage = Stage::compile(
            "0",
            &StageConfig::Output(OutputStageConfig {
                source: Some("message".to_string()),
                template: None,
            }),
        )
        .unwrap();
        stage.apply(&mut e);
        assert_eq!(e.line, "raw");
    }

    #[test]
    fn test_match_stage_guards_nested_stages() {
        let mut labels = BTreeMap::new();
        labels.insert("default".to_string(), Some("true".to_string()));
        let stage = Stage::compile(
            "2",
            &StageConfig::Match(MatchStageConfig {
                present: vec![],
                absent: vec!["service".to_string()],
                stages: vec![StageConfig::Labels(labels)],
            }),
        )
        .unwrap();

        let mut unmatched = entry("garbage");
        stage.apply(&mut unmatched);
        assert_eq!(unmatched.labels.get("default"), Some("true"));

        let mut matched = entry("structured");
        matched
            .extracted
            .insert("service".to_string(), "api".to_string());
        stage.apply(&mut matched);
        assert!(!matched.labels.contains("default"));
    }

    #[test]
    fn test_nested_stage_error_reports_path() {
        let err = Stage::compile(
            "3",
            &StageConfig::Match(MatchStageConfig {
                present: vec!["a".to_string()],
                absent: vec![],
                stages: vec![StageConfig::Regex(RegexStageConfig {
                    expression: "(".to_string(),
                    source: None,
                })],
            }),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("stage 3.0:"));
    }
}
