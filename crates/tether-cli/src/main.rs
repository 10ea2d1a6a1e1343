//! tether CLI - offline-first todo list from the terminal
//!
//! Every change lands in the local database first and is confirmed with the
//! server in the background; unconfirmed changes are retried by `tether sync`.

mod cli;
mod commands;
mod config;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::{run_edit, TodoChanges};
use crate::commands::list::run_list;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::config::{CliConfig, Overrides, Settings};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load().map_err(CliError::Config)?;
    let settings = Settings::resolve(
        &config,
        Overrides {
            api_url: cli.api_url,
            db_path: cli.db_path,
            offline_demo: cli.offline_demo,
        },
    )
    .map_err(CliError::Config)?;

    match cli.command {
        Commands::Add {
            title,
            description,
            date,
        } => run_add(&title, description, date, &settings).await?,
        Commands::List { title, local, json } => run_list(title, local, json, &settings).await?,
        Commands::Show { id, json } => run_show(id, json, &settings).await?,
        Commands::Edit {
            id,
            title,
            description,
            completed,
            open,
        } => {
            let changes = TodoChanges::new(title, description, completed, open)?;
            run_edit(id, changes, &settings).await?;
        }
        Commands::Delete { id } => run_delete(id, &settings).await?,
        Commands::Sync { watch } => run_sync(watch, &settings).await?,
        Commands::Status { json } => run_status(json, &settings).await?,
        Commands::Config { command } => run_config(command, &settings)?,
    }

    Ok(())
}
