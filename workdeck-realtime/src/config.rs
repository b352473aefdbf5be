//! Configuration system for the Workdeck real-time server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/workdeck-realtime/config.toml`)
//! 4. Compiled defaults
//!
//! The file may also carry a `[[users]]` table that seeds the in-memory
//! user directory.

use std::path::PathBuf;

use workdeck_proto::message::UserId;
use workdeck_proto::notification::NotificationType;

use crate::hub::HubSettings;
use crate::identity::{Identity, MemoryDirectory, NotificationPreferences, Role};
use crate::notify::DEFAULT_READ_RETENTION_DAYS;
use crate::offline::DEFAULT_MAX_QUEUE_SIZE;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    users: Vec<UserEntry>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    offline_queue_capacity: Option<usize>,
    recent_limit: Option<usize>,
    exclusive_rooms: Option<bool>,
    read_retention_days: Option<u64>,
    sweep_interval_secs: Option<u64>,
    log_dir: Option<PathBuf>,
}

/// One `[[users]]` entry: a user who can authenticate with `token`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserEntry {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    pub token: String,
    #[serde(default = "enabled")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub disabled_types: Vec<NotificationType>,
}

const fn enabled() -> bool {
    true
}

impl UserEntry {
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: UserId::new(self.id.clone()),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }

    #[must_use]
    pub fn preferences(&self) -> NotificationPreferences {
        NotificationPreferences {
            enabled: self.notifications_enabled,
            types: self.disabled_types.iter().map(|t| (*t, false)).collect(),
            ..NotificationPreferences::default()
        }
    }
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the real-time server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Workdeck real-time chat and notification server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "WORKDECK_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/workdeck-realtime/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Maximum queued notifications per offline user.
    #[arg(long)]
    pub offline_queue_capacity: Option<usize>,

    /// Directory for daily rolling log files (stdout only when unset).
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WORKDECK_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:4000`).
    pub bind_addr: String,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Maximum number of queued notifications per offline user.
    pub offline_queue_capacity: usize,
    /// Messages sent to a connection when it joins a room.
    pub recent_limit: usize,
    /// Whether a connection holds at most one room at a time.
    pub exclusive_rooms: bool,
    /// Days a read notification is kept before the sweep removes it.
    pub read_retention_days: u64,
    /// Seconds between notification sweeps.
    pub sweep_interval_secs: u64,
    pub log_dir: Option<PathBuf>,
    /// Log level filter string.
    pub log_level: String,
    /// Users seeding the in-memory directory.
    pub users: Vec<UserEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".to_string(),
            max_frame_size: 64 * 1024,
            offline_queue_capacity: DEFAULT_MAX_QUEUE_SIZE,
            recent_limit: 50,
            exclusive_rooms: true,
            read_retention_days: DEFAULT_READ_RETENTION_DAYS,
            sweep_interval_secs: 3600,
            log_dir: None,
            log_level: "info".to_string(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Self {
        let defaults = Self::default();
        let server = file.server;

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            offline_queue_capacity: cli
                .offline_queue_capacity
                .or(server.offline_queue_capacity)
                .unwrap_or(defaults.offline_queue_capacity),
            recent_limit: server.recent_limit.unwrap_or(defaults.recent_limit),
            exclusive_rooms: server.exclusive_rooms.unwrap_or(defaults.exclusive_rooms),
            read_retention_days: server
                .read_retention_days
                .unwrap_or(defaults.read_retention_days),
            sweep_interval_secs: server
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            log_dir: cli.log_dir.clone().or(server.log_dir),
            log_level: cli.log_level.clone(),
            users: file.users,
        }
    }

    /// Settings for [`crate::hub::Hub::new`].
    #[must_use]
    pub const fn hub_settings(&self) -> HubSettings {
        HubSettings {
            max_frame_size: self.max_frame_size,
            offline_queue_capacity: self.offline_queue_capacity,
            recent_limit: self.recent_limit,
            exclusive_rooms: self.exclusive_rooms,
            read_retention_days: self.read_retention_days,
        }
    }

    /// A directory holding every configured user.
    #[must_use]
    pub fn build_directory(&self) -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        for user in &self.users {
            let identity = user.identity();
            let user_id = identity.user_id.clone();
            directory.insert(identity, user.token.clone());
            directory.set_preferences(&user_id, user.preferences());
        }
        directory
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("workdeck-realtime").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
