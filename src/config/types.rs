use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Label on a static target holding the glob of files to tail
pub const PATH_LABEL: &str = "__path__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub positions: PositionsConfig,
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub target_config: TargetConfig,
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub pipeline: PipelineRuntimeConfig,
    pub scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_listen_port")]
    pub http_listen_port: u16,
    #[serde(default)]
    pub grpc_listen_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_graceful_shutdown", with = "humantime_serde")]
    pub graceful_shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen_port: default_http_listen_port(),
            grpc_listen_port: 0,
            log_level: default_log_level(),
            graceful_shutdown_timeout: default_graceful_shutdown(),
        }
    }
}

fn default_http_listen_port() -> u16 {
    9080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_graceful_shutdown() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsConfig {
    pub filename: PathBuf,
    #[serde(default = "default_positions_sync", with = "humantime_serde")]
    pub sync_period: Duration,
    /// Start with empty positions instead of failing when the file is corrupt
    #[serde(default)]
    pub ignore_invalid_yaml: bool,
}

fn default_positions_sync() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub url: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_batch_wait", with = "humantime_serde")]
    pub batch_wait: Duration,
    /// Maximum batch size in bytes of log line content
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on entries held in memory across all streams
    #[serde(default = "default_max_buffered_entries")]
    pub max_buffered_entries: usize,
    #[serde(default = "default_client_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub external_labels: BTreeMap<String, String>,
}

fn default_batch_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_batch_size() -> usize {
    1024 * 1024
}

fn default_max_buffered_entries() -> usize {
    10000
}

fn default_client_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_min_period", with = "humantime_serde")]
    pub min_period: Duration,
    #[serde(default = "default_max_period", with = "humantime_serde")]
    pub max_period: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_period: default_min_period(),
            max_period: default_max_period(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_min_period() -> Duration {
    Duration::from_millis(500)
}

fn default_max_period() -> Duration {
    Duration::from_secs(300)
}

fn default_max_retries() -> usize {
    10
}

/// File discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_target_sync", with = "humantime_serde")]
    pub sync_period: Duration,
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            sync_period: default_target_sync(),
            debounce: default_debounce(),
        }
    }
}

fn default_target_sync() -> Duration {
    Duration::from_secs(10)
}

fn default_debounce() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_read_retries")]
    pub max_read_retries: u32,
    #[serde(default = "default_read_retry_backoff", with = "humantime_serde")]
    pub read_retry_backoff: Duration,
    #[serde(default = "default_max_line_size")]
    pub max_line_size: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_read_retries: default_max_read_retries(),
            read_retry_backoff: default_read_retry_backoff(),
            max_line_size: default_max_line_size(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_max_read_retries() -> u32 {
    5
}

fn default_read_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_line_size() -> usize {
    256 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRuntimeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PipelineRuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub job_name: String,
    pub static_configs: Vec<StaticConfig>,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub pipeline_stages: Vec<StageConfig>,
    #[serde(default)]
    pub timestamp: TimestampStageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl StaticConfig {
    pub fn path_glob(&self) -> Option<&str> {
        self.labels.get(PATH_LABEL).map(String::as_str)
    }
}

/// One pipeline stage, written in YAML as a single-key map (`- regex: {...}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageConfig {
    Regex(RegexStageConfig),
    /// label name -> template; a null template takes the extracted field of the same name
    Labels(BTreeMap<String, Option<String>>),
    Output(OutputStageConfig),
    Match(MatchStageConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexStageConfig {
    pub expression: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputStageConfig {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStageConfig {
    #[serde(default)]
    pub present: Vec<String>,
    #[serde(default)]
    pub absent: Vec<String>,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampStageConfig {
    #[serde(default = "default_timestamp_source")]
    pub source: String,
    /// strptime format, 'iso8601', 'epoch' or 'epoch_ms'; common layouts are tried when unset
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for TimestampStageConfig {
    fn default() -> Self {
        Self {
            source: default_timestamp_source(),
            format: None,
        }
    }
}

fn default_timestamp_source() -> String {
    "timestamp".to_string()
}
