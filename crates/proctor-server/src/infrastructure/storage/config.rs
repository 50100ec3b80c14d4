//! TOML configuration of the exam server.
//!
//! The file lives in the platform-appropriate config directory unless a path
//! is given on the command line:
//! - Windows:  `%APPDATA%\ExamProctor\config.toml`
//! - Linux:    `~/.config/examproctor/config.toml`
//! - macOS:    `~/Library/Application Support/ExamProctor/config.toml`
//!
//! A complete file with every default spelled out:
//!
//! ```toml
//! [server]
//! name = "Exam Server"
//! description = "Classroom exam"
//! log_level = "info"
//!
//! [network]
//! tcp_port = 5050
//! discovery_port = 5051
//! bind_address = "auto"
//! broadcast_address = "255.255.255.255"
//! discovery_interval_ms = 1000
//!
//! [exam]
//! tick_interval_ms = 1000
//!
//! [storage]
//! data_file = "exam-data.toml"
//! token_dir = "tokens"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]` and every section
//! `#[serde(default)]`, so an empty file, a missing section, or a config
//! written by an older version all load with sensible values.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

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

    /// A value parsed but makes no sense.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub exam: ExamSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// How the server presents itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Display name in discovery announcements.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ports and addresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// UDP port student clients listen on for announcements.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// `"auto"` for the detected LAN address, or an explicit IPv4 address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
}

/// Exam run settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamSection {
    /// Countdown resolution.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// File locations.  Relative paths resolve against the working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    /// TOML file holding tests, classes, students and answers.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Directory receiving one token list per hosting round.
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "Exam Server".to_string()
}
fn default_description() -> String {
    "Classroom exam".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tcp_port() -> u16 {
    5050
}
fn default_discovery_port() -> u16 {
    5051
}
fn default_bind_address() -> String {
    "auto".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_discovery_interval_ms() -> u64 {
    1000
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_data_file() -> PathBuf {
    PathBuf::from("exam-data.toml")
}
fn default_token_dir() -> PathBuf {
    PathBuf::from("tokens")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: default_description(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
            discovery_interval_ms: default_discovery_interval_ms(),
        }
    }
}

impl Default for ExamSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            token_dir: default_token_dir(),
        }
    }
}

impl NetworkSection {
    /// Parses `broadcast_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IPv4 address.
    pub fn broadcast_ip(&self) -> Result<Ipv4Addr, ConfigError> {
        self.broadcast_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid {
                field: "network.broadcast_address",
                reason: format!("{:?} is not an IPv4 address", self.broadcast_address),
            })
    }
}

impl AppConfig {
    /// Rejects values that would make the server spin or never tick.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exam.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "exam.tick_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.network.discovery_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "network.discovery_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.network.broadcast_ip()?;
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
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

/// Loads the config from `path`, returning defaults if the file does not
/// exist.
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

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
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

/// Resolves the platform config base directory including the app folder.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ExamProctor"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("examproctor"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ExamProctor")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("proctor_cfg_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config_uses_classroom_ports() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.network.tcp_port, 5050);
        assert_eq!(cfg.network.discovery_port, 5051);
        assert_eq!(cfg.network.bind_address, "auto");
        assert_eq!(cfg.exam.tick_interval_ms, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_file_loads_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[network]
tcp_port = 6000
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.tcp_port, 6000);
        assert_eq!(cfg.network.discovery_port, 5051);
        assert_eq!(cfg.server.name, "Exam Server");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = temp_dir();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let path = std::env::temp_dir().join(format!("absent_{}.toml", Uuid::new_v4()));
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.server.name = "Room 101".to_string();
        cfg.storage.token_dir = PathBuf::from("/var/lib/proctor/tokens");

        // Act
        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut cfg = AppConfig::default();
        cfg.exam.tick_interval_ms = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "exam.tick_interval_ms", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_broadcast_address() {
        let mut cfg = AppConfig::default();
        cfg.network.broadcast_address = "everyone".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
