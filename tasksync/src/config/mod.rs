//! Configuration system for the `TaskSync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tasksync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;

use crate::conflict::{DEFAULT_EVENT_BUFFER, ManagerConfig};

/// Errors that can occur when loading configuration.
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
struct ConfigFile {
    api: ApiFileConfig,
    conflict: ConflictFileConfig,
    identity: IdentityFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    server_url: Option<String>,
}

/// `[conflict]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConflictFileConfig {
    event_buffer: Option<usize>,
    auto_resolve_version_only: Option<bool>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the task server (scheme and authority).
    pub server_url: String,
    /// Override path for the persisted client identity file.
    pub identity_path: Option<PathBuf>,
    /// Capacity of the conflict event channel.
    pub event_buffer: usize,
    /// Resubmit version-only conflicts without waiting for an
    /// acknowledgement.
    pub auto_resolve_version_only: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4680".to_string(),
            identity_path: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            auto_resolve_version_only: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/tasksync/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.api.server_url.clone())
                .unwrap_or(defaults.server_url),
            identity_path: cli
                .identity_path
                .clone()
                .or_else(|| file.identity.path.clone()),
            event_buffer: file
                .conflict
                .event_buffer
                .unwrap_or(defaults.event_buffer),
            auto_resolve_version_only: cli
                .auto_resolve_version_only
                .or(file.conflict.auto_resolve_version_only)
                .unwrap_or(defaults.auto_resolve_version_only),
        }
    }

    /// Build the [`ManagerConfig`] slice of this configuration.
    #[must_use]
    pub const fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            event_buffer: self.event_buffer,
            auto_resolve_version_only: self.auto_resolve_version_only,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Optimistic-concurrency task client")]
pub struct CliArgs {
    /// Base URL of the task server.
    #[arg(long, env = "TASKSYNC_SERVER_URL")]
    pub server_url: Option<String>,

    /// Path to config file (default: `~/.config/tasksync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the persisted client identity file.
    #[arg(long)]
    pub identity_path: Option<PathBuf>,

    /// Resubmit version-only conflicts without acknowledgement
    /// (true/false).
    #[arg(long)]
    pub auto_resolve_version_only: Option<bool>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: stderr only).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = match explicit_path {
        Some(p) => {
            // Explicit path must exist.
            let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
                path: p.to_path_buf(),
                source: e,
            })?;
            return Ok(toml::from_str(&contents)?);
        }
        None => {
            let Some(config_dir) = dirs::config_dir() else {
                return Ok(ConfigFile::default());
            };
            config_dir.join("tasksync").join("config.toml")
        }
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
