use logship::config::{generate::generate_starter_config, load_config, ConfigError};
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let config_path = dir.path().join("config.yml");
    fs::write(&config_path, yaml).unwrap();
    config_path
}

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(&temp_dir, &generate_starter_config());

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.scrape_configs.len(), 1);
    let job = &config.scrape_configs[0];
    assert_eq!(job.job_name, "grid_trading_bot");
    assert_eq!(
        job.static_configs[0].labels.get("__path__").map(String::as_str),
        Some("/var/log/grid_trading_bot/*.log")
    );
    assert_eq!(job.pipeline_stages.len(), 10);
    assert_eq!(job.timestamp.format.as_deref(), Some("%Y-%m-%d %H:%M:%S,%3f"));
    assert_eq!(config.clients[0].tenant_id, None);
}

#[test]
fn test_env_vars_expand_into_client() {
    std::env::set_var("LOGSHIP_IT_TENANT", "bots");
    let temp_dir = TempDir::new().unwrap();
    let yaml = generate_starter_config().replace(
        "    # tenant_id: my-tenant",
        "    tenant_id: $env{LOGSHIP_IT_TENANT}",
    );
    let config_path = write_config(&temp_dir, &yaml);

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.clients[0].tenant_id.as_deref(), Some("bots"));
    std::env::remove_var("LOGSHIP_IT_TENANT");
}

#[test]
fn test_unset_env_var_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let yaml = generate_starter_config().replace(
        "http://loki:3100/loki/api/v1/push",
        "$env{LOGSHIP_IT_MISSING_URL}",
    );
    let config_path = write_config(&temp_dir, &yaml);

    let err = load_config(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("LOGSHIP_IT_MISSING_URL"));
}

#[test]
fn test_all_validation_errors_reported_together() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(
        &temp_dir,
        r#"
positions:
  filename: /tmp/positions.yaml
clients:
  - url: loki:3100
    batch_size: 0
scrape_configs:
  - job_name: app
    static_configs:
      - targets: [localhost]
        labels:
          job: app
    pipeline_stages:
      - regex:
          expression: '(?P<unclosed'
"#,
    );

    let err = load_config(&config_path).unwrap_err();
    let ConfigError::ValidationList(errors) = &err else {
        panic!("expected a validation list, got {}", err);
    };
    let joined = errors.join("\n");
    assert!(joined.contains("must start with http://"), "{}", joined);
    assert!(joined.contains("batch_size must be greater than 0"), "{}", joined);
    assert!(joined.contains("missing '__path__' label"), "{}", joined);
    assert!(joined.contains("(?P<unclosed"), "{}", joined);
}

#[test]
fn test_duplicate_job_names_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let job = r#"
  - job_name: app
    static_configs:
      - labels:
          __path__: /var/log/app/*.log
"#;
    let yaml = format!(
        "positions:\n  filename: /tmp/p.yaml\nclients:\n  - url: http://localhost:3100/push\nscrape_configs:{}{}",
        job, job
    );
    let config_path = write_config(&temp_dir, &yaml);

    let err = load_config(&config_path).unwrap_err().to_string();
    assert!(err.contains("duplicate job_name 'app'"), "{}", err);
}

#[test]
fn test_missing_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = load_config(&temp_dir.path().join("nope.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
    assert!(err.to_string().contains("nope.yml"));
}
