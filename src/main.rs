use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use boardd::{
    client::{remote::BoardClient, remote::EventFeed, remote::MoveOutcome, ClientCache},
    config::BoardConfig,
    order::{DropTarget, MoveRequest},
    store::Section,
    AppContext,
};

#[derive(Parser)]
#[command(
    name = "boardd",
    about = "boardd: task board daemon with realtime reorder sync",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// WebSocket change-feed port
    #[arg(long, env = "BOARDD_PORT")]
    port: Option<u16>,

    /// REST API port
    #[arg(long, env = "BOARDD_REST_PORT")]
    rest_port: Option<u16>,

    /// Data directory for the SQLite database and config
    #[arg(long, env = "BOARDD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BOARDD_LOG")]
    log: Option<String>,

    /// Bind address for both servers (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "BOARDD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "BOARDD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    ///
    /// Runs the REST API and the WebSocket change feed in the foreground.
    Serve,
    /// List tasks, grouped by section in board order.
    List {
        /// Only this section
        #[arg(long)]
        section: Option<String>,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a task at the end of a section (default: Triage).
    Add {
        title: String,
        #[arg(long, default_value = "Triage")]
        section: String,
    },
    /// Toggle a task's completion.
    Done { id: i64 },
    /// Delete a task.
    Rm { id: i64 },
    /// Move a task, the CLI equivalent of a drag-and-drop.
    ///
    /// Examples:
    ///   boardd move 12 --to A
    ///   boardd move 12 --to A --index 0
    ///   boardd move 12 --to B --before 7
    Move {
        id: i64,
        /// Destination section
        #[arg(long)]
        to: String,
        /// Insert at this position within the destination
        #[arg(long, conflicts_with = "before")]
        index: Option<usize>,
        /// Insert immediately before this task
        #[arg(long)]
        before: Option<i64>,
    },
    /// Follow the change feed and print every event.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BoardConfig::new(
        args.port,
        args.rest_port,
        args.data_dir.clone(),
        args.log.clone(),
        args.bind_address.clone(),
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let _guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);
            serve(config).await
        }
        Command::List { section, json } => list(&config, section.as_deref(), json).await,
        Command::Add { title, section } => add(&config, &title, &section).await,
        Command::Done { id } => done(&config, id).await,
        Command::Rm { id } => rm(&config, id).await,
        Command::Move {
            id,
            to,
            index,
            before,
        } => move_cmd(&config, id, to, index, before).await,
        Command::Watch => watch(&config).await,
    }
}

async fn serve(config: BoardConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting boardd"
    );
    let ctx = Arc::new(AppContext::new(config).await?);

    let rest_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = boardd::rest::run(rest_ctx).await {
            warn!(err = %e, "REST server exited");
        }
    });

    // The change feed owns the shutdown signal; when it returns we are done.
    boardd::ws::run(ctx).await
}

async fn list(config: &BoardConfig, section: Option<&str>, json: bool) -> Result<()> {
    let client = BoardClient::new(config.rest_port);
    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await?);

    let sections: Vec<Section> = match section {
        Some(s) => vec![s.parse()?],
        None => Section::ALL.to_vec(),
    };

    if json {
        let tasks: Vec<_> = sections
            .iter()
            .flat_map(|s| cache.section_tasks(*s))
            .collect();
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    for s in sections {
        let tasks = cache.section_tasks(s);
        println!("{s} ({})", tasks.len());
        for t in tasks {
            let mark = if t.completed { "x" } else { " " };
            match &t.revisit_date {
                Some(d) => println!("  [{mark}] #{} {} (revisit {})", t.id, t.title, &d[..10]),
                None => println!("  [{mark}] #{} {}", t.id, t.title),
            }
        }
    }
    Ok(())
}

async fn add(config: &BoardConfig, title: &str, section: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(anyhow!("title must not be empty"));
    }
    let client = BoardClient::new(config.rest_port);
    let task = client.add_task(title, section.parse()?).await?;
    println!("created #{} in {} at order {}", task.id, task.section, task.order);
    Ok(())
}

async fn done(config: &BoardConfig, id: i64) -> Result<()> {
    let client = BoardClient::new(config.rest_port);
    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await?);

    let completed = cache
        .get(id)
        .ok_or_else(|| anyhow!("task {id} not found"))?
        .completed;
    let mutation = cache.optimistic_edit(id, |t| t.completed = !completed)?;

    match client.patch_task(id, json!({ "completed": !completed })).await {
        Ok(task) => {
            cache.confirm(mutation, std::slice::from_ref(&task));
            println!(
                "#{} {}: {}",
                task.id,
                task.title,
                if task.completed { "done" } else { "reopened" }
            );
            Ok(())
        }
        Err(e) => {
            cache.roll_back(mutation);
            Err(e)
        }
    }
}

async fn rm(config: &BoardConfig, id: i64) -> Result<()> {
    let client = BoardClient::new(config.rest_port);
    let task = client.delete_task(id).await?;
    println!("deleted #{} {}", task.id, task.title);
    Ok(())
}

async fn move_cmd(
    config: &BoardConfig,
    id: i64,
    to: String,
    index: Option<usize>,
    before: Option<i64>,
) -> Result<()> {
    let target = match (before, index) {
        (Some(task_id), _) => DropTarget::OnTask(task_id),
        (None, Some(i)) => DropTarget::AtIndex(i),
        (None, None) => DropTarget::End,
    };

    let client = BoardClient::new(config.rest_port);
    let mut cache = ClientCache::new();
    cache.replace_all(client.fetch_tasks().await?);

    let request = MoveRequest {
        task_id: id,
        section: to,
        target,
    };
    match client.move_task(&mut cache, &request).await? {
        MoveOutcome::Committed(tasks) => {
            println!("moved #{id} ({} task(s) re-keyed)", tasks.len());
        }
        MoveOutcome::Resynced { failed } => {
            println!("move failed ({failed} update(s) did not commit); board resynced");
        }
    }
    Ok(())
}

async fn watch(config: &BoardConfig) -> Result<()> {
    let mut feed = EventFeed::connect(config.port).await?;
    eprintln!("watching change feed on port {} (Ctrl-C to stop)", config.port);
    while let Some(event) = feed.next_event().await? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("boardd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // A bad log path should not take the daemon down.
            eprintln!(
                "warn: could not create log directory '{}': {e}; falling back to stdout",
                dir.display()
            );
            init_stdout_logging(log_level, use_json);
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
        }
        return Some(guard);
    }

    init_stdout_logging(log_level, use_json);
    None
}

fn init_stdout_logging(log_level: &str, use_json: bool) {
    if use_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}
