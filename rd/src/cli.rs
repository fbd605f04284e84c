//! CLI command definitions and subcommands

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

/// RelayDaemon - session-aware relay to a headless reasoning CLI
#[derive(Parser)]
#[command(
    name = "rd",
    about = "Session-aware relay between a message transport and a headless reasoning CLI",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the relay
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Internal: Run as the relay process (used by `start`)
    #[command(hide = true)]
    RunDaemon,

    /// Stop the relay
    Stop,

    /// Show relay and session status
    Status,

    /// Ping the relay to check if it's alive and responsive
    Ping,

    /// Send a message through the relay and print the replies
    Send {
        /// Message text
        text: String,

        /// Attach a local file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Extra context for this message
        #[arg(long)]
        context: Option<String>,

        /// Sender name shown to the model
        #[arg(short, long, default_value = "cli")]
        sender: String,
    },

    /// Inspect or reset the conversation session
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Show relay logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Session subcommands
#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Show the stored continuity token and its age
    Show,

    /// Forget the continuity token so the next message starts fresh
    Clear,
}

/// Generate the after_help text with relay status and log location
pub fn generate_after_help(running: bool, log_path: &Path) -> String {
    let icon = if running { "\u{2705}" } else { "\u{274C}" };
    let status = if running { "running" } else { "stopped" };
    format!(
        "Relay:\n  {} {}\n\nLogs are written to: {}\n",
        icon,
        status,
        log_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_start() {
        let cli = Cli::parse_from(["rd", "start"]);
        assert!(matches!(cli.command, Command::Start { foreground: false }));
    }

    #[test]
    fn test_cli_parse_start_foreground() {
        let cli = Cli::parse_from(["rd", "start", "--foreground"]);
        assert!(matches!(cli.command, Command::Start { foreground: true }));
    }

    #[test]
    fn test_cli_parse_run_daemon() {
        let cli = Cli::parse_from(["rd", "run-daemon"]);
        assert!(matches!(cli.command, Command::RunDaemon));
    }

    #[test]
    fn test_cli_parse_send_with_options() {
        let cli = Cli::parse_from([
            "rd",
            "send",
            "what is this?",
            "--file",
            "/tmp/pic.png",
            "--context",
            "from the gallery",
            "--sender",
            "mo",
        ]);
        match cli.command {
            Command::Send {
                text,
                file,
                context,
                sender,
            } => {
                assert_eq!(text, "what is this?");
                assert_eq!(file, Some(PathBuf::from("/tmp/pic.png")));
                assert_eq!(context.as_deref(), Some("from the gallery"));
                assert_eq!(sender, "mo");
            }
            other => panic!("Expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_send_default_sender() {
        let cli = Cli::parse_from(["rd", "send", "hi"]);
        assert!(matches!(cli.command, Command::Send { ref sender, .. } if sender == "cli"));
    }

    #[test]
    fn test_cli_parse_session_clear() {
        let cli = Cli::parse_from(["rd", "session", "clear"]);
        assert!(matches!(
            cli.command,
            Command::Session {
                command: SessionCommand::Clear
            }
        ));
    }

    #[test]
    fn test_cli_parse_logs() {
        let cli = Cli::parse_from(["rd", "logs", "-f", "-n", "10"]);
        assert!(matches!(
            cli.command,
            Command::Logs {
                follow: true,
                lines: 10
            }
        ));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from(["rd", "status", "--config", "/etc/rd.yml", "-l", "debug"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/rd.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["rd"]).is_err());
    }

    #[test]
    fn test_after_help_mentions_log_path() {
        let help = generate_after_help(false, Path::new("/var/log/rd.log"));
        assert!(help.contains("stopped"));
        assert!(help.contains("/var/log/rd.log"));
    }
}
