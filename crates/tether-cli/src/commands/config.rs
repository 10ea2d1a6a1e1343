use std::path::PathBuf;

use crate::cli::ConfigCommands;
use crate::config::{default_config_path, normalize_api_url, CliConfig, Settings};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, settings: &Settings) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            run_config_show(settings);
            Ok(())
        }
        ConfigCommands::Set {
            api_url,
            resource,
            poll_interval_ms,
            db_path,
        } => run_config_set(api_url, resource, poll_interval_ms, db_path),
    }
}

fn run_config_show(settings: &Settings) {
    println!("Config file:   {}", default_config_path().display());
    println!("API URL:       {}", settings.api_base_url);
    println!("Resource:      {}", settings.resource);
    println!("Database:      {}", settings.db_path.display());
    println!("Poll interval: {}ms", settings.poll_interval.as_millis());
}

pub fn run_config_set(
    api_url: Option<String>,
    resource: Option<String>,
    poll_interval_ms: Option<u64>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let mut config = CliConfig::load().map_err(CliError::Config)?;
    apply_config_changes(&mut config, api_url, resource, poll_interval_ms, db_path)?;
    let path = config.save().map_err(CliError::Config)?;
    println!("Saved {}", path.display());
    Ok(())
}

pub fn apply_config_changes(
    config: &mut CliConfig,
    api_url: Option<String>,
    resource: Option<String>,
    poll_interval_ms: Option<u64>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    if api_url.is_none() && resource.is_none() && poll_interval_ms.is_none() && db_path.is_none() {
        return Err(CliError::Config(
            "nothing to set; pass --api-url, --resource, --poll-interval-ms or --db-path".into(),
        ));
    }
    if let Some(api_url) = api_url {
        config.api_base_url = Some(normalize_api_url(&api_url).map_err(CliError::Config)?);
    }
    if let Some(resource) = resource {
        config.resource = Some(resource);
    }
    if let Some(poll_interval_ms) = poll_interval_ms {
        if poll_interval_ms == 0 {
            return Err(CliError::Config("poll interval must be positive".into()));
        }
        config.poll_interval_ms = Some(poll_interval_ms);
    }
    if let Some(db_path) = db_path {
        config.db_path = Some(db_path);
    }
    Ok(())
}
