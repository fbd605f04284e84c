//! RelayDaemon - session-aware relay to a headless reasoning CLI
//!
//! CLI entry point for running and managing the relay.

use std::fs;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaydaemon::cli::{Cli, Command, SessionCommand, generate_after_help};
use relaydaemon::config::Config;
use relaydaemon::executor::{CommandExecutor, Executor};
use relaydaemon::lock::{self, InstanceLock, VERSION};
use relaydaemon::prompts::PromptBuilder;
use relaydaemon::recovery::RecoveryController;
use relaydaemon::relay::Relay;
use relaydaemon::session::SessionStore;
use relaydaemon::supervisor::ConnectionSupervisor;
use relaydaemon::transport::{MessageHandler, RelayClient, RelayEvent, RelayRequest, SocketListener};

/// How long `stop` waits before escalating to SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(5);

fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_uppercase().as_str() {
        "TRACE" => Some(tracing::Level::TRACE),
        "DEBUG" => Some(tracing::Level::DEBUG),
        "INFO" => Some(tracing::Level::INFO),
        "WARN" | "WARNING" => Some(tracing::Level::WARN),
        "ERROR" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

fn setup_logging(log_dir: &Path, log_path: &Path, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => parse_level(s).unwrap_or_else(|| {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Help text reflects the default config; --config isn't parsed yet
    let defaults = Config::load(None).unwrap_or_default();
    let running = InstanceLock::new(defaults.lock_path()).status().running;
    let cmd = Cli::command().after_help(generate_after_help(running, &defaults.log_path()));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(
        &config.log_dir(),
        &config.log_path(),
        cli.log_level.as_deref(),
        config_log_level.as_deref(),
    )
    .context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match &cli.command {
        Command::Start { foreground } => cmd_start(&config, &cli, *foreground).await,
        Command::RunDaemon => run_relay(&config).await,
        Command::Stop => cmd_stop(&config).await,
        Command::Status => cmd_status(&config),
        Command::Ping => cmd_ping(&config).await,
        Command::Send {
            text,
            file,
            context,
            sender,
        } => cmd_send(&config, text, file.as_deref(), context.clone(), sender).await,
        Command::Session { command } => cmd_session(&config, command),
        Command::Logs { follow, lines } => cmd_logs(&config, *follow, *lines),
    }
}

/// Start the relay, in the background unless `foreground` is set
async fn cmd_start(config: &Config, cli: &Cli, foreground: bool) -> Result<()> {
    debug!(foreground, "cmd_start: called");
    let status = InstanceLock::new(config.lock_path()).status();
    if status.running {
        let pid = status.record.map(|r| r.pid).unwrap_or_default();
        println!("Relay is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        println!("Starting relay in foreground mode...");
        return run_relay(config).await;
    }

    let exe = std::env::current_exe().context("Failed to get current executable")?;
    let mut command = std::process::Command::new(&exe);
    if let Some(path) = &cli.config {
        command.arg("--config").arg(path);
    }
    if let Some(level) = &cli.log_level {
        command.arg("--log-level").arg(level);
    }
    let mut child = command
        .arg("run-daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Failed to spawn relay process")?;
    let pid = child.id();
    info!(pid, "Relay spawned");

    // The child takes the lock itself; wait for it so a failed start is visible
    let lock = InstanceLock::new(config.lock_path());
    for _ in 0..30 {
        if lock.owner() == Some(pid) {
            println!("Relay started (PID: {})", pid);
            return Ok(());
        }
        if let Ok(Some(exit)) = child.try_wait() {
            return Err(eyre::eyre!(
                "Relay exited during startup ({}); see {}",
                exit,
                config.log_path().display()
            ));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("Relay spawned (PID: {}) but has not taken the lock yet", pid);
    Ok(())
}

/// Stop the relay
///
/// Tries a socket shutdown first, falls back to SIGTERM, then SIGKILL.
async fn cmd_stop(config: &Config) -> Result<()> {
    debug!("cmd_stop: called");
    let lock = InstanceLock::new(config.lock_path());
    let Some(pid) = lock.owner() else {
        println!("Relay is not running");
        return Ok(());
    };

    let client = RelayClient::with_socket_path(config.socket_path.clone()).with_timeout(config.relay.request_timeout());
    if client.socket_exists() {
        match client.shutdown().await {
            Ok(()) => {
                // The relay drops its lock record on the way out
                let mut waited = Duration::ZERO;
                while lock.owner() == Some(pid) && waited < STOP_GRACE {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    waited += Duration::from_millis(100);
                }
                if lock.owner() != Some(pid) {
                    println!("Relay stopped gracefully (was PID: {})", pid);
                    return Ok(());
                }
                debug!("cmd_stop: socket shutdown timed out, falling back to SIGTERM");
            }
            Err(e) => debug!(error = %e, "cmd_stop: socket shutdown failed, falling back to SIGTERM"),
        }
    }

    tokio::task::spawn_blocking(move || lock::terminate(pid, STOP_GRACE))
        .await
        .context("Stop task panicked")??;
    println!("Relay stopped (was PID: {})", pid);
    Ok(())
}

/// Show relay and session status
fn cmd_status(config: &Config) -> Result<()> {
    debug!("cmd_status: called");
    let status = InstanceLock::new(config.lock_path()).status();

    println!("Relay Status");
    println!("------------");
    if status.running {
        println!("Status:  {}", "running".green());
    } else {
        println!("Status:  {}", "stopped".red());
    }
    if let Some(record) = &status.record {
        let stale = if status.running { "" } else { " (stale)" };
        println!("PID:     {}{}", record.pid, stale);
        println!("Version: {}", record.version);
        println!("Since:   {}", record.acquired_at.to_rfc3339());
    }
    println!("Lock:    {}", status.lock_file.display());
    println!("Socket:  {}", config.socket_path.display());

    println!();
    print_session(config);
    Ok(())
}

/// Ping the relay over its socket
async fn cmd_ping(config: &Config) -> Result<()> {
    debug!("cmd_ping: called");
    let client = RelayClient::with_socket_path(config.socket_path.clone()).with_timeout(config.relay.request_timeout());
    if !client.socket_exists() {
        println!("Relay is not running (no socket at {})", config.socket_path.display());
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("Relay is alive and responsive");
            println!("Version: {}", version);
            if version != VERSION {
                println!("{}", format!("Note: this CLI is {}", VERSION).yellow());
            }
        }
        Err(e) => {
            println!("Relay socket exists but is not responding");
            println!("Error: {}", e);
        }
    }
    Ok(())
}

/// Send one message and print replies as they arrive
async fn cmd_send(config: &Config, text: &str, file: Option<&Path>, context: Option<String>, sender: &str) -> Result<()> {
    debug!(%sender, ?file, "cmd_send: called");
    let attachment: Option<PathBuf> = match file {
        Some(path) => Some(fs::canonicalize(path).context(format!("Attachment not found: {}", path.display()))?),
        None => None,
    };

    let client = RelayClient::with_socket_path(config.socket_path.clone()).with_timeout(config.relay.request_timeout());
    if !client.socket_exists() {
        return Err(eyre::eyre!("Relay is not running; start it with `rd start`"));
    }

    let request = RelayRequest::Message {
        sender: sender.to_string(),
        text: text.to_string(),
        attachment,
        context,
    };
    let replies = client
        .send(request, |event| {
            if let RelayEvent::Reply { text } = event {
                println!("{}", text);
            }
        })
        .await?;
    debug!(replies = replies.len(), "cmd_send: done");
    Ok(())
}

fn print_session(config: &Config) {
    let store = SessionStore::new(config.session_path());
    let session = store.load();
    match session.token() {
        Some(token) => {
            let age = session.age_at(Utc::now());
            println!("Session: {}", token);
            println!("Last activity: {} ({} min ago)", session.last_activity.to_rfc3339(), age.num_minutes());
        }
        None => println!("Session: {}", "none (next message starts fresh)".dimmed()),
    }
}

/// Inspect or reset the session
fn cmd_session(config: &Config, command: &SessionCommand) -> Result<()> {
    debug!(?command, "cmd_session: called");
    match command {
        SessionCommand::Show => print_session(config),
        SessionCommand::Clear => {
            SessionStore::new(config.session_path())
                .clear()
                .context("Failed to clear session")?;
            println!("Session cleared");
            if InstanceLock::new(config.lock_path()).status().running {
                println!("{}", "The running relay keeps its in-memory session until restarted".yellow());
            }
        }
    }
    Ok(())
}

/// Show relay logs
fn cmd_logs(config: &Config, follow: bool, lines: usize) -> Result<()> {
    debug!(follow, lines, "cmd_logs: called");
    let log_path = config.log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
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

/// Run the relay until a signal or a socket shutdown request
async fn run_relay(config: &Config) -> Result<()> {
    debug!("run_relay: called");
    config.validate().context("Invalid configuration")?;

    // Fatal when another live instance holds the lock
    let guard = InstanceLock::new(config.lock_path())
        .acquire_guard()
        .context("Failed to acquire instance lock")?;
    info!(pid = std::process::id(), version = VERSION, lock = ?guard.path(), "Relay starting");

    let store = SessionStore::new(config.session_path());
    let session = store.load();
    let executor: Arc<dyn Executor> = Arc::new(CommandExecutor::new(config.executor.clone(), store.clone()));
    let controller = Arc::new(RecoveryController::new(executor, store, session));
    let prompts = PromptBuilder::new(config.prompts.template_dir.as_deref()).context("Failed to load prompt template")?;
    let relay: Arc<dyn MessageHandler> = Arc::new(Relay::new(controller, prompts, config.relay.clone()));

    let shutdown = CancellationToken::new();
    let supervisor = ConnectionSupervisor::from_config(&config.supervisor);
    let socket_path = config.socket_path.clone();
    let read_timeout = config.relay.request_timeout();
    let listen = supervisor.run(|| {
        let listener = SocketListener::new(socket_path.clone(), shutdown.clone()).with_read_timeout(read_timeout);
        let handler = relay.clone();
        async move { listener.listen(handler).await }
    });

    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    info!("Relay running");
    let result = tokio::select! {
        result = listen => result.context("Listener failed"),
        _ = sigint.recv() => {
            warn!("SIGINT received");
            Ok(())
        }
        _ = sigterm.recv() => {
            warn!("SIGTERM received");
            Ok(())
        }
    };

    shutdown.cancel();
    drop(guard);
    info!("Relay stopped");
    result
}
