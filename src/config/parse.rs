use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, expand_tilde_str, unexpanded_env_vars};
use crate::pipeline::Pipeline;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    load_config_str(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(err) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), err),
        )),
        other => other,
    })
}

/// Parse, expand and validate a config from its YAML text
pub fn load_config_str(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml_string);

    match unexpanded.as_slice() {
        [] => Ok(()),
        [single] => Err(ConfigError::Validation(format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            single
        ))),
        many => Err(ConfigError::Validation(format!(
            "Environment variables are not set: {}",
            many.join(", ")
        ))),
    }
}

/// Expands tilde (~) in the positions file and every `__path__` glob
fn expand_paths(config: &mut Config) {
    config.positions.filename = expand_tilde(&config.positions.filename);

    for scrape in &mut config.scrape_configs {
        for static_config in &mut scrape.static_configs {
            if let Some(glob) = static_config.labels.get_mut(PATH_LABEL) {
                *glob = expand_tilde_str(glob);
            }
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_runtime(config, &mut errors);

    if config.clients.is_empty() {
        errors.push("clients must contain at least one push endpoint".to_string());
    }
    for (i, client) in config.clients.iter().enumerate() {
        validate_client(&format!("clients[{}]", i), client, &mut errors);
    }

    if config.scrape_configs.is_empty() {
        errors.push("scrape_configs must contain at least one job".to_string());
    }
    let mut job_names = HashSet::new();
    for (i, scrape) in config.scrape_configs.iter().enumerate() {
        if scrape.job_name.is_empty() {
            errors.push(format!("scrape_configs[{}]: job_name cannot be empty", i));
        } else if !job_names.insert(scrape.job_name.as_str()) {
            errors.push(format!(
                "scrape_configs[{}]: duplicate job_name '{}'",
                i, scrape.job_name
            ));
        }
        validate_scrape(scrape, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_runtime(config: &Config, errors: &mut Vec<String>) {
    if config.positions.filename.as_os_str().is_empty() {
        errors.push("positions.filename cannot be empty".to_string());
    }
    if config.pipeline.workers == 0 {
        errors.push("pipeline.workers must be at least 1".to_string());
    }
    if config.pipeline.channel_capacity == 0 {
        errors.push("pipeline.channel_capacity must be at least 1".to_string());
    }
    if config.tail.max_line_size == 0 {
        errors.push("tail.max_line_size must be at least 1".to_string());
    }
    if tracing_subscriber::EnvFilter::try_new(&config.server.log_level).is_err() {
        errors.push(format!(
            "server.log_level: invalid level '{}'",
            config.server.log_level
        ));
    }
}

fn validate_client(prefix: &str, client: &ClientConfig, errors: &mut Vec<String>) {
    if client.url.is_empty() {
        errors.push(format!("{}: url cannot be empty", prefix));
    } else if !client.url.starts_with("http://") && !client.url.starts_with("https://") {
        errors.push(format!(
            "{}: url '{}' must start with http:// or https://",
            prefix, client.url
        ));
    }
    if client.batch_size == 0 {
        errors.push(format!("{}: batch_size must be greater than 0", prefix));
    }
    if client.max_buffered_entries == 0 {
        errors.push(format!(
            "{}: max_buffered_entries must be greater than 0",
            prefix
        ));
    }
    if client.backoff.max_retries == 0 {
        errors.push(format!("{}: backoff.max_retries must be at least 1", prefix));
    }
    if client.backoff.min_period > client.backoff.max_period {
        errors.push(format!(
            "{}: backoff.min_period must not exceed backoff.max_period",
            prefix
        ));
    }
}

fn validate_scrape(scrape: &ScrapeConfig, errors: &mut Vec<String>) {
    let prefix = format!("job '{}'", scrape.job_name);

    if scrape.static_configs.is_empty() {
        errors.push(format!("{}: static_configs cannot be empty", prefix));
    }
    for (i, static_config) in scrape.static_configs.iter().enumerate() {
        match static_config.path_glob() {
            None => errors.push(format!(
                "{}, static_configs[{}]: missing '{}' label",
                prefix, i, PATH_LABEL
            )),
            Some(pattern) => {
                if let Err(e) = glob::Pattern::new(pattern) {
                    errors.push(format!(
                        "{}, static_configs[{}]: invalid glob '{}': {}",
                        prefix, i, pattern, e
                    ));
                }
            }
        }
    }

    // Pipeline compilation covers regexes, templates, label names and timestamp formats
    if let Err(e) = Pipeline::compile(scrape) {
        errors.push(format!("{}: {}", prefix, e));
    }
}
