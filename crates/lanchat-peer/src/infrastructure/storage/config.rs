//! TOML-based configuration for the chat peer.
//!
//! Read from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LanChat\config.toml`
//! - Linux:    `~/.config/lanchat/config.toml`
//! - macOS:    `~/Library/Application Support/LanChat/config.toml`
//!
//! A missing file is not an error; every field has a default, so the peer
//! runs with no config at all.  Command-line flags override whatever the
//! file says.
//!
//! ```toml
//! [node]
//! name = "alice-laptop"
//! log_level = "debug"
//!
//! [network]
//! listen_port = 7878
//! discovery_port = 7879
//! reconnect_cooldown_secs = 10
//!
//! [auth]
//! names = ["lion", "tiger", "bear"]
//! match_policy = "unordered"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  Whole
//! sections may be omitted too (`#[serde(default)]` on the section).

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanchat_core::{AuthConfig, MatchPolicy, Secret, DEFAULT_NAME_COUNT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but makes no sense (e.g. an unparseable bind address).
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub auth: AuthSettings,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Name shown to the other side in chat and announcements.
    #[serde(default = "default_name")]
    pub name: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ports, addresses, and connection timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port for incoming chat connections.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// IP address to bind both sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// UDP port for announcements.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Destination IP for announcements.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Minimum seconds between automatic dials to the same peer; 0 disables.
    #[serde(default = "default_reconnect_cooldown_secs")]
    pub reconnect_cooldown_secs: u64,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    /// Longest accepted frame in bytes, newline excluded.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Pairing handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSettings {
    /// The shared names.  When absent the user is prompted at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default = "default_name_count")]
    pub name_count: usize,
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub match_policy: MatchPolicy,
    /// When `false`, outgoing handshakes answer with `names` without asking.
    #[serde(default = "default_true")]
    pub prompt_on_challenge: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "lanchat".to_string())
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_listen_port() -> u16 {
    7878
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_discovery_port() -> u16 {
    7879
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_announce_interval_secs() -> u64 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_reconnect_cooldown_secs() -> u64 {
    10
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}
fn default_name_count() -> usize {
    DEFAULT_NAME_COUNT
}
fn default_auth_timeout_secs() -> u64 {
    30
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            bind_address: default_bind_address(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            announce_interval_secs: default_announce_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_cooldown_secs: default_reconnect_cooldown_secs(),
            discovery_enabled: default_true(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            names: None,
            name_count: default_name_count(),
            timeout_secs: default_auth_timeout_secs(),
            match_policy: MatchPolicy::default(),
            prompt_on_challenge: default_true(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl AppConfig {
    /// Handshake settings for the `AuthManager`.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            name_count: self.auth.name_count,
            timeout: Duration::from_secs(self.auth.timeout_secs),
            match_policy: self.auth.match_policy,
        }
    }

    /// The configured shared names, if any.
    pub fn local_secret(&self) -> Option<Secret> {
        self.auth.names.as_ref().map(Secret::new)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` is not an IP.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(
            self.bind_ip()?,
            self.network.listen_port,
        ))
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` is not an IP.
    pub fn discovery_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(
            self.bind_ip()?,
            self.network.discovery_port,
        ))
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `broadcast_address` is not an IP.
    pub fn broadcast_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_ip("network.broadcast_address", &self.network.broadcast_address)?;
        Ok(SocketAddr::new(ip, self.network.discovery_port))
    }

    fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        parse_ip("network.bind_address", &self.network.bind_address)
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|e| ConfigError::Invalid {
        field,
        message: format!("'{value}': {e}"),
    })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from the default path.  See [`load_config_from`].
///
/// # Errors
///
/// See [`load_config_from`]; also [`ConfigError::NoPlatformConfigDir`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the `lanchat` part.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanChat"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanchat"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanChat")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
