// Configuration loading and parsing (config/billsplit.toml).

use billsplit_core::PercentagePolicy;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// File name looked up in both `defaults/` and `config/`.
pub const CONFIG_FILE_NAME: &str = "billsplit.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_broadcast_updates")]
    pub broadcast_updates: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub percentage_policy: PercentagePolicy,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_broadcast_updates() -> bool {
    true
}

fn default_command_buffer() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 9030,
            broadcast_updates: default_broadcast_updates(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            percentage_policy: PercentagePolicy::default(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl Config {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/billsplit.toml` relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()` for normal startup.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE_NAME);
    let text = read_file(&path)?;
    parse_config(&text, &path)
}

/// Parse and validate config text. `path` is only used for error messages.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Seed `config/billsplit.toml` from `defaults/` on first run.
///
/// Returns the path written, or `None` when the config file already exists
/// or there is no shipped default to copy. An existing file is never
/// overwritten.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let source = base_dir.join("defaults").join(CONFIG_FILE_NAME);
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE_NAME);

    if target.exists() {
        return Ok(None);
    }
    if !source.is_file() {
        if config_dir.exists() {
            // Loading will report the missing file.
            return Ok(None);
        }
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither defaults/ nor config/ directory found in {}; \
                 start billsplit from the directory holding defaults/{CONFIG_FILE_NAME}",
                base_dir.display()
            ),
        });
    }

    let copy_err = |what: &str, e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("{what}: {e}"),
    };

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_err("failed to create config directory", e))?;
    let content = std::fs::read(&source)
        .map_err(|e| copy_err(&format!("failed to read {}", source.display()), e))?;

    // create_new so a file written concurrently since the check above wins.
    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(dest) => dest,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(copy_err(&format!("failed to create {}", target.display()), e)),
    };
    dest.write_all(&content)
        .map_err(|e| copy_err(&format!("failed to write {}", target.display()), e))?;

    info!("Created {} from shipped defaults", target.display());
    Ok(Some(target))
}

/// Load config relative to the current working directory, copying defaults
/// into `config/` first if needed.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: "must not be empty".into(),
        });
    }

    if config.ledger.command_buffer == 0 {
        return Err(ConfigError::ValidationError {
            field: "ledger.command_buffer".into(),
            message: "must be > 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
