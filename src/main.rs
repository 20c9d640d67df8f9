//! Cadence 命令行入口
//!
//! - `cadence run`（默认）：后台循环，直到 Ctrl+C / SIGTERM
//! - `cadence status`：下一个窗口与最近一次会话
//! - `cadence tick`：以当前时刻执行一次 tick（适合 cron）

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence::config::load_config;
use cadence::core::{
    OrchestratorBuilder, SessionOrchestrator, SessionRuntime, ShutdownCoordinator, ShutdownManager,
    StoreCleanup, SystemClock,
};
use cadence::observability;
use cadence::session::SessionStore;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};

/// Scheduled social-network session automation
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler loop until interrupted
    Run,
    /// Show the next due window and the latest session
    Status,
    /// Run a single tick at the current instant and exit
    Tick,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let config = load_config(cli.config).context("Failed to load configuration")?;
    let builder = OrchestratorBuilder::new(config);
    let orchestrator = Arc::new(builder.build(Local).context("Invalid configuration")?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&builder, orchestrator).await,
        Commands::Status => status(&orchestrator).await,
        Commands::Tick => tick_once(&orchestrator).await,
    }
}

async fn run(
    builder: &OrchestratorBuilder,
    orchestrator: Arc<SessionOrchestrator<Local>>,
) -> anyhow::Result<()> {
    let manager = Arc::new(ShutdownManager::new());
    manager.listen_for_signals();

    let runtime = SessionRuntime::new(
        Arc::clone(&orchestrator),
        Arc::new(SystemClock),
        builder.config().tick_interval(),
        builder.config().tick_timeout(),
    );
    runtime.run(manager.token()).await;

    tracing::info!(signal = ?manager.signal(), "Tick loop stopped, running cleanup");
    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    coordinator.register(StoreCleanup::new(orchestrator.store()));
    if coordinator.run().await > 0 {
        tracing::warn!("Some cleanup tasks did not finish");
    }
    Ok(())
}

async fn status(orchestrator: &SessionOrchestrator<Local>) -> anyhow::Result<()> {
    let now = Utc::now();
    match orchestrator.next_due(now).await? {
        Some(window) => println!(
            "next window: {} {} - {} (main post {})",
            window.scheduled_date,
            window.start.with_timezone(&Local).format("%H:%M %Z"),
            window.end.with_timezone(&Local).format("%H:%M %Z"),
            window.main_post.with_timezone(&Local).format("%H:%M"),
        ),
        None => println!("next window: none configured"),
    }

    let store = orchestrator.store();
    let Some(session) = store.latest().await? else {
        println!("no sessions recorded yet");
        return Ok(());
    };
    let records = store.records(&session.session_id).await?;
    println!("latest session: {}", session.session_id);
    println!("  phase:          {}", session.phase);
    println!("  publish status: {}", session.publish_status.as_str());
    println!(
        "  likes:          {} pre / {} post",
        session.engagement_progress.pre.likes, session.engagement_progress.post.likes
    );
    println!(
        "  comments:       {} pre / {} post",
        session.engagement_progress.pre.comments, session.engagement_progress.post.comments
    );
    println!("  records:        {}", records.len());
    if let Some(started) = session.started_at {
        println!("  started at:     {}", started.with_timezone(&Local));
    }
    if let Some(completed) = session.completed_at {
        println!("  completed at:   {}", completed.with_timezone(&Local));
    }
    Ok(())
}

async fn tick_once(orchestrator: &SessionOrchestrator<Local>) -> anyhow::Result<()> {
    let outcome = orchestrator
        .tick(None, Utc::now())
        .await
        .context("Tick failed")?;
    match &outcome.session {
        Some(session) => {
            println!("{}: {}", session.session_id, session.phase);
            for (from, to) in &outcome.transitions {
                println!("  {from} -> {to}");
            }
            if let Some(record) = &outcome.dispatched {
                println!(
                    "  {} {} -> {}",
                    record.action_type.as_str(),
                    record.target_id,
                    record.outcome.as_str()
                );
            }
        }
        None => match outcome.next_due {
            Some(window) => println!(
                "idle, next window starts {}",
                window.start.with_timezone(&Local)
            ),
            None => println!("idle"),
        },
    }
    let store = orchestrator.store();
    store.flush().await?;
    Ok(())
}
