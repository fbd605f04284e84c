//! relaydaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name of the persisted session record inside the state directory
pub const SESSION_FILE: &str = "session.json";

/// File name of the instance lock record inside the state directory
pub const LOCK_FILE: &str = "relay.lock";

/// Main relaydaemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Directory holding the session record, the lock record and logs
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Unix socket the local transport listens on
    #[serde(rename = "socket-path")]
    pub socket_path: PathBuf,

    /// External reasoning process configuration
    pub executor: ExecutorConfig,

    /// Connection supervisor configuration
    pub supervisor: SupervisorConfig,

    /// Relay pipeline configuration
    pub relay: RelayConfig,

    /// Prompt template configuration
    pub prompts: PromptsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            state_dir: default_state_dir(),
            socket_path: default_socket_path(),
            executor: ExecutorConfig::default(),
            supervisor: SupervisorConfig::default(),
            relay: RelayConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.relay.chunk_limit == 0 {
            return Err(eyre::eyre!("relay.chunk-limit must be greater than zero"));
        }
        if self.relay.typing_interval_ms == 0 {
            return Err(eyre::eyre!("relay.typing-interval-ms must be greater than zero"));
        }
        if self.relay.request_timeout_ms == 0 {
            return Err(eyre::eyre!("relay.request-timeout-ms must be greater than zero"));
        }
        if self.executor.timeout_ms == 0 || self.executor.long_timeout_ms == 0 {
            return Err(eyre::eyre!("executor timeouts must be greater than zero"));
        }
        if self.executor.binary.as_os_str().is_empty() {
            return Err(eyre::eyre!("executor.binary must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .relaydaemon.yml
        let local_config = PathBuf::from(".relaydaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/relaydaemon/relaydaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("relaydaemon").join("relaydaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load only the log level (before logging is initialized)
    ///
    /// Errors are swallowed: a broken config file is reported by the full
    /// `load` once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(p) => p.clone(),
            None => {
                let local = PathBuf::from(".relaydaemon.yml");
                if local.exists() {
                    local
                } else {
                    dirs::config_dir()?.join("relaydaemon").join("relaydaemon.yml")
                }
            }
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Path of the persisted session record
    pub fn session_path(&self) -> PathBuf {
        self.state_dir.join(SESSION_FILE)
    }

    /// Path of the instance lock record
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Directory for log files
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Path of the main log file
    pub fn log_path(&self) -> PathBuf {
        self.log_dir().join("relaydaemon.log")
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaydaemon")
}

fn default_socket_path() -> PathBuf {
    let path = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("relaydaemon")
        .join("relay.sock");
    debug!(?path, "default_socket_path: returning path");
    path
}

/// External reasoning process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Binary to invoke (looked up on PATH when not absolute)
    pub binary: PathBuf,

    /// Optional model identifier passed as `--model`
    pub model: Option<String>,

    /// Value passed as `--output-format`
    #[serde(rename = "output-format")]
    pub output_format: String,

    /// Timeout for short conversational turns in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Timeout for long jobs (file references, long prompts) in milliseconds
    #[serde(rename = "long-timeout-ms")]
    pub long_timeout_ms: u64,

    /// Prompts with at least this many characters are long jobs
    #[serde(rename = "long-prompt-chars")]
    pub long_prompt_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            model: None,
            output_format: "json".to_string(),
            timeout_ms: 120_000,
            long_timeout_ms: 1_200_000,
            long_prompt_chars: 5000,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_millis(self.long_timeout_ms)
    }
}

/// Connection supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wait after a conflict before restarting the listener, in milliseconds
    #[serde(rename = "conflict-backoff-ms")]
    pub conflict_backoff_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            conflict_backoff_ms: 35_000,
        }
    }
}

impl SupervisorConfig {
    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}

/// Relay pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum characters per outbound reply
    #[serde(rename = "chunk-limit")]
    pub chunk_limit: usize,

    /// How often the typing indicator is refreshed while a request runs
    #[serde(rename = "typing-interval-ms")]
    pub typing_interval_ms: u64,

    /// Number of recent memory intents fed back into prompts
    #[serde(rename = "memory-capacity")]
    pub memory_capacity: usize,

    /// Deadline for a socket peer to send its request line, and for the
    /// CLI's short exchanges (ping, shutdown)
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_limit: crate::chunker::DEFAULT_LIMIT,
            typing_interval_ms: 4000,
            memory_capacity: 20,
            request_timeout_ms: 5000,
        }
    }
}

impl RelayConfig {
    pub fn typing_interval(&self) -> Duration {
        Duration::from_millis(self.typing_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Prompt template configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory checked for `relay.pmt` before the embedded template
    #[serde(rename = "template-dir")]
    pub template_dir: Option<PathBuf>,
}
