use std::path::PathBuf;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tether_core::{Filter, Row, RowState, SyncPass};

use crate::commands::common::{
    finish, format_todo_lines, non_blank, normalize_title, open_engine, state_label,
    todo_completed, todo_to_list_item,
};
use crate::commands::config::apply_config_changes;
use crate::commands::edit::TodoChanges;
use crate::commands::status::format_checkpoint;
use crate::commands::sync::describe_pass;
use crate::config::{
    normalize_api_url, CliConfig, Overrides, Settings, API_URL_ENV, DB_PATH_ENV, DEFAULT_API_URL,
};
use crate::error::CliError;

fn demo_settings(db_path: PathBuf) -> Settings {
    Settings {
        api_base_url: DEFAULT_API_URL.to_string(),
        resource: "todo".to_string(),
        db_path,
        poll_interval: Duration::from_millis(10),
        offline_demo: true,
    }
}

#[test]
fn normalize_title_joins_and_rejects_empty() {
    let parts = vec!["  buy".to_string(), "milk  ".to_string()];
    assert_eq!(normalize_title(&parts).unwrap(), "buy milk");
    assert!(matches!(
        normalize_title(&[" ".to_string()]),
        Err(CliError::EmptyTitle)
    ));
    assert!(matches!(normalize_title(&[]), Err(CliError::EmptyTitle)));
}

#[test]
fn non_blank_trims_and_drops_empty_text() {
    assert_eq!(non_blank(Some("  milk ".to_string())).as_deref(), Some("milk"));
    assert_eq!(non_blank(Some(" \n ".to_string())), None);
    assert_eq!(non_blank(None), None);
}

#[test]
fn normalize_api_url_requires_http_scheme() {
    assert_eq!(
        normalize_api_url("http://localhost:4000/api/").unwrap(),
        "http://localhost:4000/api"
    );
    assert!(normalize_api_url("localhost:4000/api").is_err());
    assert!(normalize_api_url("ftp://example.com").is_err());
    assert!(normalize_api_url("https://").is_err());
}

#[test]
fn settings_prefer_flags_then_env_then_file() {
    let config = CliConfig {
        api_base_url: Some("https://file.example.com/api".to_string()),
        resource: Some("tasks".to_string()),
        poll_interval_ms: Some(250),
        db_path: Some(PathBuf::from("/tmp/file.db")),
        ..CliConfig::default()
    };
    let env = |name: &str| match name {
        API_URL_ENV => Some("https://env.example.com/api".to_string()),
        DB_PATH_ENV => Some("/tmp/env.db".to_string()),
        _ => None,
    };

    let from_env = Settings::resolve_with_env(&config, Overrides::default(), env).unwrap();
    assert_eq!(from_env.api_base_url, "https://env.example.com/api");
    assert_eq!(from_env.db_path, PathBuf::from("/tmp/env.db"));
    assert_eq!(from_env.resource, "tasks");
    assert_eq!(from_env.poll_interval, Duration::from_millis(250));

    let from_flags = Settings::resolve_with_env(
        &config,
        Overrides {
            api_url: Some("http://flag.example.com".to_string()),
            db_path: Some(PathBuf::from("/tmp/flag.db")),
            offline_demo: true,
        },
        env,
    )
    .unwrap();
    assert_eq!(from_flags.api_base_url, "http://flag.example.com");
    assert_eq!(from_flags.db_path, PathBuf::from("/tmp/flag.db"));
    assert!(from_flags.offline_demo);

    let from_file = Settings::resolve_with_env(&config, Overrides::default(), |_| None).unwrap();
    assert_eq!(from_file.api_base_url, "https://file.example.com/api");
    assert_eq!(from_file.db_path, PathBuf::from("/tmp/file.db"));
}

#[test]
fn settings_fall_back_to_defaults() {
    let settings =
        Settings::resolve_with_env(&CliConfig::default(), Overrides::default(), |_| None).unwrap();
    assert_eq!(settings.api_base_url, DEFAULT_API_URL);
    assert_eq!(settings.resource, "todo");
    assert_eq!(settings.poll_interval, Duration::from_secs(1));
    assert!(!settings.offline_demo);
}

#[test]
fn settings_reject_non_http_api_url() {
    let result = Settings::resolve_with_env(
        &CliConfig::default(),
        Overrides {
            api_url: Some("ftp://example.com".to_string()),
            ..Overrides::default()
        },
        |_| None,
    );
    assert!(result.is_err());
}

#[test]
fn config_round_trips_and_normalizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cli-config.json");

    let config = CliConfig {
        api_base_url: Some(" https://api.example.com/api/ ".to_string()),
        resource: Some("/todo/".to_string()),
        poll_interval_ms: Some(0),
        ..CliConfig::default()
    };
    config.save_to_path(&path).unwrap();

    let loaded = CliConfig::load_from_path(&path).unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.api_base_url.as_deref(), Some("https://api.example.com/api"));
    assert_eq!(loaded.resource.as_deref(), Some("todo"));
    assert_eq!(loaded.poll_interval_ms, None);
}

#[test]
fn missing_config_file_loads_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = CliConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
    assert_eq!(loaded, CliConfig::default());
}

#[test]
fn apply_config_changes_validates_input() {
    let mut config = CliConfig::default();
    assert!(apply_config_changes(&mut config, None, None, None, None).is_err());
    assert!(apply_config_changes(&mut config, None, None, Some(0), None).is_err());
    assert!(
        apply_config_changes(&mut config, Some("not a url".to_string()), None, None, None)
            .is_err()
    );

    apply_config_changes(
        &mut config,
        Some("http://localhost:4000/api".to_string()),
        Some("todo".to_string()),
        Some(500),
        None,
    )
    .unwrap();
    assert_eq!(config.api_base_url.as_deref(), Some("http://localhost:4000/api"));
    assert_eq!(config.poll_interval_ms, Some(500));
}

#[test]
fn todo_changes_require_something_to_change() {
    assert!(matches!(
        TodoChanges::new(None, None, false, false),
        Err(CliError::NothingToUpdate)
    ));
    assert!(matches!(
        TodoChanges::new(Some("  ".to_string()), None, false, false),
        Err(CliError::NothingToUpdate)
    ));

    let reopen = TodoChanges::new(None, None, false, true).unwrap();
    assert_eq!(reopen.completed, Some(false));
    let done = TodoChanges::new(None, None, true, false).unwrap();
    assert_eq!(done.completed, Some(true));
}

#[test]
fn describe_pass_summarizes_outcomes() {
    assert_eq!(describe_pass(SyncPass::Idle), "Nothing to push");
    assert_eq!(
        describe_pass(SyncPass::Completed {
            confirmed: 2,
            failed: 0
        }),
        "Pushed 2 change(s)"
    );
    assert_eq!(
        describe_pass(SyncPass::Completed {
            confirmed: 1,
            failed: 1
        }),
        "Pushed 1 change(s), 1 failed"
    );
}

#[test]
fn format_checkpoint_renders_utc() {
    assert_eq!(format_checkpoint(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn state_labels_mark_unconfirmed_rows() {
    assert_eq!(state_label(RowState::Clean), None);
    assert_eq!(state_label(RowState::PendingCreate), Some("(not synced)"));
    assert_eq!(state_label(RowState::PendingDelete), Some("(deleting)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_demo_keeps_changes_pending_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let settings = demo_settings(dir.path().join("tether.db"));

    {
        let engine = open_engine(&settings).await.unwrap();
        let row = Row::new()
            .with("title", "buy milk\nfrom the corner shop")
            .with("completed", 0);
        let todo = engine.create(row).await.unwrap();
        assert!(todo.key("id").unwrap() < 0);
        assert!(!finish(&engine).await.unwrap());
    }

    let engine = open_engine(&settings).await.unwrap();
    let todos = engine.list(&Filter::new()).await.unwrap();
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].state("id"), RowState::PendingCreate);
    assert!(!todo_completed(&todos[0]));

    let item = todo_to_list_item(&todos[0]);
    assert_eq!(item.title, "buy milk\nfrom the corner shop");
    assert_eq!(item.state, RowState::PendingCreate);

    let lines = format_todo_lines(&todos);
    assert!(lines[0].ends_with("[ ] buy milk  (not synced)"));
    assert!(!lines[0].contains("corner shop"));

    assert!(matches!(
        engine.sync_pending().await.unwrap(),
        SyncPass::Completed {
            confirmed: 0,
            failed: 1
        }
    ));
    engine.shutdown().await.unwrap();
}
