use crate::config::generate::generate_starter_config;
use crate::config::load_config;
use crate::config::types::Config;
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = user_config_path().unwrap_or_else(|| PathBuf::from("/etc/logship/config.yml"));

    if config_path.exists() {
        return Err(format!(
            "config file already exists at {}, remove it first or use --stdout",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// ~/.config/logship/config.yml when its directory can be created
fn user_config_path() -> Option<PathBuf> {
    let user_config = dirs::home_dir()?.join(".config/logship/config.yml");
    let parent = user_config.parent()?;
    match fs::create_dir_all(parent) {
        Ok(()) => Some(user_config),
        Err(e) => {
            eprintln!("Warning: could not create {}: {}", parent.display(), e);
            eprintln!("Falling back to /etc/logship/config.yml");
            None
        }
    }
}

/// Load and validate a config, then print what it would run
pub fn check(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    print!("{}", summarize(config_path, &config));
    Ok(())
}

fn summarize(config_path: &Path, config: &Config) -> String {
    let mut out = format!("Config OK: {}\n", config_path.display());
    out.push_str(&format!(
        "  positions: {} (sync every {:?})\n",
        config.positions.filename.display(),
        config.positions.sync_period
    ));
    for client in &config.clients {
        match &client.tenant_id {
            Some(tenant) => out.push_str(&format!("  client: {} (tenant {})\n", client.url, tenant)),
            None => out.push_str(&format!("  client: {}\n", client.url)),
        }
    }
    for scrape in &config.scrape_configs {
        let paths: Vec<&str> = scrape
            .static_configs
            .iter()
            .filter_map(|s| s.labels.get("__path__").map(String::as_str))
            .collect();
        out.push_str(&format!(
            "  job {}: {} stage(s), paths [{}]\n",
            scrape.job_name,
            scrape.pipeline_stages.len(),
            paths.join(", ")
        ));
    }
    out
}
