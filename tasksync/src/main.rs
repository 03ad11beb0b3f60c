//! `TaskSync` client -- optimistic-concurrency demo driver.
//!
//! Creates a task against a running `tasksync-server`, lets a second
//! installation move the version forward, then submits a deliberately
//! stale edit through the conflict manager and walks the resulting
//! session to a merged resolution. Configuration via CLI flags,
//! environment variables, or config file
//! (`~/.config/tasksync/config.toml`).
//!
//! ```bash
//! # Against the default server address
//! cargo run --bin tasksync
//!
//! # Against a custom server
//! cargo run --bin tasksync -- --server-url http://127.0.0.1:8080
//!
//! # Or via environment variable
//! TASKSYNC_SERVER_URL=http://127.0.0.1:8080 cargo run --bin tasksync
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::api::{HttpApi, TaskApi};
use tasksync::cache::InMemoryCache;
use tasksync::config::{CliArgs, ClientConfig};
use tasksync::conflict::{
    ComparisonRow, ConflictEvent, ConflictManager, EditOutcome, Resolution, SessionOutcome, Side,
};
use tasksync::identity;
use tasksync_proto::api::{CreateTagBody, CreateTaskBody};
use tasksync_proto::patch::{ClientEdit, TaskField, TaskPatch};
use tasksync_proto::task::{ClientId, TaskPriority, TaskStatus};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(server = %config.server_url, "tasksync client starting");

    if let Err(e) = run_demo(&config).await {
        tracing::error!(error = %e, "conflict demo failed");
        std::process::exit(1);
    }

    tracing::info!("tasksync client exiting");
}

/// Initialize logging to stderr, or to a file when `--log-file` is given.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed; `None` when logging straight to stderr.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Scripted end-to-end pass over the conflict subsystem.
#[allow(clippy::too_many_lines)]
async fn run_demo(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Step 1: Load the persistent client identity and build the stack.
    let client_id = match config.identity_path {
        Some(ref path) => identity::client_id_at(path),
        None => identity::client_id(),
    };
    tracing::info!(client_id = %client_id, "loaded client identity");

    let api = Arc::new(HttpApi::new(&config.server_url));
    let cache = Arc::new(InMemoryCache::new());
    let (manager, mut events) = ConflictManager::new(
        Arc::clone(&api),
        Arc::clone(&cache),
        client_id.clone(),
        config.manager_config(),
    );

    // Step 2: Create a tag and a task, and cache the fresh snapshot.
    let tag = api
        .create_tag(&CreateTagBody {
            name: "release".to_string(),
            color: "#e06c75".to_string(),
        })
        .await?;

    let task = api
        .create_task(&CreateTaskBody {
            title: "Draft release notes".to_string(),
            description: Some("Collect changes since the last tag".to_string()),
            status: None,
            priority: Some(TaskPriority::High),
            due_date: None,
            tags: Some(vec![tag.id]),
            client_id: Some(client_id.clone()),
        })
        .await?;
    println!("created '{}' at {}", task.title, task.version);
    cache.insert(task.clone());

    // Step 3: A second installation edits the same task, so the server
    // version moves past our cached snapshot.
    let competitor = ClientId::new("competitor-installation");
    let their_changes = TaskPatch {
        title: Some("Publish release notes".to_string()),
        status: Some(TaskStatus::InProgress),
        ..Default::default()
    };
    let their_edit = ClientEdit::against(&task, their_changes, competitor);
    api.submit_edit(&their_edit).await?;
    println!("another installation updated the task behind our back");

    // Step 4: Submit a stale edit through the manager and inspect the
    // conflict it detects.
    let our_changes = TaskPatch {
        title: Some("Draft v2 release notes".to_string()),
        priority: Some(TaskPriority::Urgent),
        ..Default::default()
    };
    let edit = manager.edit_against(&task, our_changes);
    match manager.submit(edit).await? {
        EditOutcome::Applied(applied) => {
            // Only possible if nobody raced us, which step 3 rules out.
            println!("edit applied cleanly at {}", applied.version);
            return Ok(());
        }
        EditOutcome::ConflictPending { kind, rows } => {
            println!("\n{kind} conflict detected:");
            print_rows(&rows);
        }
    }

    // Step 5: Keep our title, accept their workflow state, and resubmit.
    let picks = [(TaskField::Title, Side::Local)].into_iter().collect();
    match manager.resolve(task.id, &Resolution::Merge(picks)).await? {
        EditOutcome::Applied(applied) => {
            println!("\nmerged and applied at {}", applied.version);
            println!("  title:    {}", applied.title);
            println!("  status:   {}", applied.status);
            println!("  priority: {}", applied.priority);
        }
        EditOutcome::ConflictPending { kind, .. } => {
            println!("\nconflicted again ({kind}); leaving the session open");
        }
    }

    // Step 6: Show what the manager reported along the way.
    while let Ok(event) = events.try_recv() {
        match event {
            ConflictEvent::ConflictDetected { task_id, kind, .. } => {
                println!("event: conflict detected on {task_id} ({kind})");
            }
            ConflictEvent::SessionClosed { task_id, outcome } => match outcome {
                SessionOutcome::Applied { version } => {
                    println!("event: session on {task_id} closed, applied at {version}");
                }
                SessionOutcome::Cancelled => {
                    println!("event: session on {task_id} cancelled");
                }
                SessionOutcome::Failed { reason } => {
                    println!("event: session on {task_id} failed: {reason}");
                }
            },
        }
    }

    // Step 7: List tasks to show the final server state.
    let tasks = api.list_tasks().await?;
    println!("\nserver now holds {} task(s):", tasks.len());
    for t in &tasks {
        println!("  {} '{}' [{}] {}", t.version, t.title, t.status, t.priority);
    }

    Ok(())
}

/// Print a field-by-field comparison table, marking differing rows.
fn print_rows(rows: &[ComparisonRow]) {
    println!("  {:<12} {:<28} {:<28}", "field", "yours", "server's");
    for row in rows {
        let marker = if row.differs { "*" } else { " " };
        println!(
            "{marker} {:<12} {:<28} {:<28}",
            row.label, row.local, row.server
        );
    }
    println!("  (* differs)");
}
