//! broadcastd - scheduled segmented broadcast daemon
//!
//! CLI entry point for running and inspecting the daemon.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{error, info, warn};

use broadcastd::bot::{BotHandler, Router};
use broadcastd::cli::{Cli, Command, OutputFormat, get_log_path};
use broadcastd::composer::Composer;
use broadcastd::config::Config;
use broadcastd::daemon::{DaemonManager, VERSION};
use broadcastd::dispatch::Dispatcher;
use broadcastd::domain::schedule::format_local;
use broadcastd::membership::MembershipStore;
use broadcastd::scheduler::BroadcastScheduler;
use broadcastd::state::StateManager;
use broadcastd::transport::{Transport, VkTeamsClient, spawn_inbound};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to the log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;
    Config::load_dotenv();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(version = VERSION, store_dir = %config.storage.store_dir, "broadcastd loaded config");

    match cli.command {
        Some(Command::Start { foreground }) => cmd_start(&config, cli.config.as_ref(), foreground).await,
        Some(Command::Stop) => cmd_stop(),
        Some(Command::Status { format }) => cmd_status(&config, format).await,
        Some(Command::Logs { follow, lines }) => cmd_logs(follow, lines),
        Some(Command::Broadcasts { pending, format }) => cmd_broadcasts(&config, pending, format).await,
        Some(Command::Segments) => cmd_segments(&config).await,
        Some(Command::RunDaemon) => cmd_run_daemon(&config).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Start the daemon
async fn cmd_start(config: &Config, config_path: Option<&PathBuf>, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if let Some(pid) = daemon.running_pid() {
        println!("broadcastd is already running (PID: {})", pid);
        if !daemon.version_matches() {
            let warning = "Running daemon was built from a different version; restart it with `bd stop && bd start`.";
            println!("{}", warning.yellow());
        }
        return Ok(());
    }

    if foreground {
        println!("Starting broadcastd in foreground mode...");
        run_daemon(config).await
    } else {
        // Fail here rather than inside the detached process
        config.validate()?;
        let pid = daemon.start(config_path)?;
        println!("broadcastd started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("broadcastd is not running");
        return Ok(());
    }

    let pid = daemon.stop()?;
    println!("broadcastd stopped (was PID: {})", pid);
    Ok(())
}

/// Open the store for read-only CLI commands, if it exists
fn open_state(config: &Config) -> Result<Option<StateManager>> {
    let store_path = PathBuf::from(&config.storage.store_dir);
    if !store_path.exists() {
        return Ok(None);
    }
    let state = StateManager::spawn(&store_path).context("Failed to open BroadcastStore")?;
    Ok(Some(state))
}

/// Show daemon status
async fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let status = DaemonManager::new().status();
    let stats = match open_state(config)? {
        Some(state) => {
            let stats = state.stats().await?;
            state.shutdown().await?;
            Some(stats)
        }
        None => None,
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "daemon": status,
                "cli_version": VERSION,
                "store_dir": config.storage.store_dir,
                "store": stats,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("broadcastd Status");
            println!("-----------------");
            match status.pid {
                Some(pid) => {
                    println!("Status: {}", "running".green());
                    println!("PID: {}", pid);
                    if let Some(version) = &status.version {
                        println!("Version: {}", version);
                    }
                }
                None => println!("Status: {}", "stopped".red()),
            }
            println!("PID file: {}", status.pid_file.display());
            println!("Store: {}", config.storage.store_dir);

            match stats {
                Some(stats) => {
                    println!();
                    println!("Recipients: {}", stats.recipients);
                    println!("Segments:   {}", stats.segments);
                    println!("Broadcasts pending: {}", stats.broadcasts_pending);
                    println!("Broadcasts sent:    {}", stats.broadcasts_sent);
                    if stats.broadcasts_partial > 0 {
                        println!("  with failed sends: {}", stats.broadcasts_partial.to_string().yellow());
                    }
                }
                None => println!("No store found. Has the daemon run?"),
            }
        }
    }

    Ok(())
}

/// Show logs
fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("The daemon may not have been started yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let all_lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

/// List broadcasts
async fn cmd_broadcasts(config: &Config, pending: bool, format: OutputFormat) -> Result<()> {
    let Some(state) = open_state(config)? else {
        println!("No store found. Has the daemon run?");
        return Ok(());
    };

    let filter = pending.then_some(false);
    let broadcasts = state.list_broadcasts(filter).await?;
    state.shutdown().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&broadcasts)?),
        OutputFormat::Text => {
            if broadcasts.is_empty() {
                println!("No broadcasts.");
                return Ok(());
            }

            let tz = config.schedule.tz()?;
            println!("{:<16} {:<20} {:<12} {:<16} STATUS", "NAME", "ID", "SEGMENT", "SCHEDULED");
            for broadcast in &broadcasts {
                let status = match broadcast.status_label() {
                    "pending" => "pending".cyan(),
                    "sent" => "sent".green(),
                    other => other.yellow(),
                };
                println!(
                    "{:<16} {:<20} {:<12} {:<16} {}",
                    truncate(&broadcast.name, 16),
                    truncate(&broadcast.id, 20),
                    truncate(&broadcast.segment, 12),
                    format_local(broadcast.scheduled_at, tz),
                    status
                );
            }
        }
    }

    Ok(())
}

/// List segments with member counts
async fn cmd_segments(config: &Config) -> Result<()> {
    let Some(state) = open_state(config)? else {
        println!("No store found. Has the daemon run?");
        return Ok(());
    };

    let membership = MembershipStore::new(state.clone());
    let segments = membership.list_segments().await?;
    if segments.is_empty() {
        println!("No segments.");
    }
    for segment in &segments {
        let members = membership.members_of(&segment.name).await?.len();
        println!("{:<20} {} member(s)", segment.name, members);
    }

    state.shutdown().await?;
    Ok(())
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut short: String = value.chars().take(width.saturating_sub(1)).collect();
    short.push('~');
    short
}

/// Run as the daemon process (internal command)
async fn cmd_run_daemon(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;

    let result = run_daemon(config).await;
    if let Err(e) = &result {
        error!(error = %e, "Daemon exited with error");
    }
    if let Err(e) = daemon.unregister() {
        warn!(error = %e, "Failed to remove daemon PID file");
    }
    result
}

/// Run the daemon main loop
async fn run_daemon(config: &Config) -> Result<()> {
    info!("Daemon starting...");

    // Fail fast on missing token or bad settings
    config.validate().context("Invalid configuration")?;
    let tz = config.schedule.tz()?;
    info!("Startup validation passed");

    let store_path = PathBuf::from(&config.storage.store_dir);
    fs::create_dir_all(&store_path).context("Failed to create store directory")?;

    let state = StateManager::spawn(&store_path)?;
    info!("StateManager initialized");

    let membership = MembershipStore::new(state.clone());
    for name in &config.segments.base {
        membership
            .ensure_segment(name)
            .await
            .with_context(|| format!("Failed to ensure segment '{}'", name))?;
    }
    info!(segments = ?config.segments.base, "Base segments ensured");

    let transport: Arc<dyn Transport> =
        Arc::new(VkTeamsClient::from_config(&config.bot).context("Failed to create bot client")?);
    info!(base_url = %config.bot.base_url, "Bot client initialized");

    let dispatcher = Dispatcher::new(
        membership.clone(),
        transport.clone(),
        config.scheduler.max_concurrent_sends,
    );
    let scheduler = BroadcastScheduler::new(config.scheduler.clone(), state.clone(), dispatcher).start();
    info!("Scheduler started");

    let composer = Composer::new(state.clone(), membership, tz);
    let handler = Arc::new(BotHandler::new(state.clone(), composer, transport.clone()));
    let (inbound, pump) = spawn_inbound(transport, config.bot.poll_backoff(), config.router.lane_capacity);
    let router = Router::new(handler, config.router.clone()).start(inbound);
    info!("Router started");

    info!("Daemon running. Press Ctrl+C to stop.");
    wait_for_signal().await?;

    info!("Daemon shutting down...");

    // Intake first: the router drops the inbound receiver, which ends the pump
    router.stop().await;
    if let Err(e) = pump.await {
        error!(error = %e, "Inbound pump panicked");
    }

    // An in-flight sweep finishes before this returns
    scheduler.stop().await;

    state.shutdown().await?;
    info!("Daemon stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => warn!("SIGINT received"),
        _ = sigterm.recv() => warn!("SIGTERM received"),
    }
    Ok(())
}
