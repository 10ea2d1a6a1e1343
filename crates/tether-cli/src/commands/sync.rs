use tether_core::{Filter, SyncEngine, SyncPass};

use crate::commands::common::open_engine;
use crate::config::Settings;
use crate::error::CliError;

pub async fn run_sync(watch: bool, settings: &Settings) -> Result<(), CliError> {
    let engine = open_engine(settings).await?;
    if watch {
        return watch_until_interrupted(&engine).await;
    }

    let pass = engine.sync_pending().await?;
    println!("{}", describe_pass(pass));

    match pull_server_changes(&engine).await {
        Ok((fetched, removed)) => {
            println!("Fetched {fetched} todo(s) from the server");
            if removed {
                println!("Removed todos deleted on the server");
            }
        }
        Err(error) if error.is_remote() => {
            eprintln!("Could not reach the server: {error}");
        }
        Err(error) => return Err(error.into()),
    }

    engine.shutdown().await?;
    let pending = engine.status().await?.pending;
    if pending > 0 {
        println!("{pending} change(s) still pending");
    }
    Ok(())
}

async fn pull_server_changes(engine: &SyncEngine) -> tether_core::Result<(usize, bool)> {
    let removed = engine.pull_deletions().await?;
    let fetched = engine.pull(&Filter::new()).await?.len();
    Ok((fetched, removed))
}

async fn watch_until_interrupted(engine: &SyncEngine) -> Result<(), CliError> {
    let status = engine.status().await?;
    println!(
        "Watching {} pending change(s) every {:?}; press Ctrl-C to stop",
        status.pending,
        engine.config().poll_interval
    );
    engine.spawn_sync_loop();
    tokio::signal::ctrl_c().await?;
    engine.shutdown().await?;

    let pending = engine.status().await?.pending;
    println!("Stopped with {pending} change(s) pending");
    Ok(())
}

pub fn describe_pass(pass: SyncPass) -> String {
    match pass {
        SyncPass::Idle => "Nothing to push".to_string(),
        SyncPass::Deferred => "Another change is in flight; try again".to_string(),
        SyncPass::Completed { confirmed, failed: 0 } => {
            format!("Pushed {confirmed} change(s)")
        }
        SyncPass::Completed { confirmed, failed } => {
            format!("Pushed {confirmed} change(s), {failed} failed")
        }
        SyncPass::Aborted {
            confirmed,
            remaining,
        } => format!("Pushed {confirmed} change(s), interrupted with {remaining} left"),
    }
}
