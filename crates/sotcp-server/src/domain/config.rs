//! TOML configuration for the bridge server.
//!
//! The file holds one optional `[server]` table and one `[[session]]` table
//! per serial device.  Sessions are kept in file order; that order is the
//! order in which they are accepted, streamed and cleaned up.
//!
//! ```toml
//! [server]
//! log_level = "info"
//! scheduling = "concurrent"
//! queue_depth = 64
//!
//! [[session]]
//! name = "Sensor1"
//! tcp_port = 5000
//! serial_port = "/dev/ttyUSB0"
//!
//! [[session]]
//! name = "Sensor2"
//! tcp_port = 5001
//! serial_port = "/dev/ttyUSB1"
//! serial_send_on = "\n"
//! ```
//!
//! See [`sotcp_core::SessionSpec`] for every session key and its default.
//!
//! # Fallback
//!
//! A file that is missing, malformed or lists no sessions yields a
//! [`ConfigError`].  The binary then runs [`ServerConfig::default`], a single
//! session named `default`, rather than starting with no sessions at all.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sotcp_core::{validate_all, SessionSpec, SpecError};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed, or a value is out of range.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A session failed validation.
    #[error("invalid session: {0}")]
    Invalid(#[from] SpecError),

    /// The file parsed but configures no sessions.
    #[error("config defines no [[session]] tables")]
    NoSessions,
}

/// How the scheduler drives its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// One pass accepts every session in order, then streaming passes
    /// service each session in order.  A silent session delays later ones.
    Sequential,
    /// One task per session; sessions accept and stream independently.
    #[default]
    Concurrent,
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulingMode::Sequential => "sequential",
            SchedulingMode::Concurrent => "concurrent",
        })
    }
}

impl FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(SchedulingMode::Sequential),
            "concurrent" => Ok(SchedulingMode::Concurrent),
            other => Err(format!(
                "unknown scheduling mode '{other}' (expected 'sequential' or 'concurrent')"
            )),
        }
    }
}

/// Process-wide settings from the `[server]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub scheduling: SchedulingMode,
    /// Frames buffered per session between serial reader and socket writer.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_queue_depth() -> usize {
    64
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scheduling: SchedulingMode::default(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default, rename = "session")]
    pub sessions: Vec<SessionSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            sessions: vec![SessionSpec::with_defaults("default")],
        }
    }
}

impl ServerConfig {
    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for TOML or value errors,
    /// [`ConfigError::NoSessions`] for an empty session list and
    /// [`ConfigError::Invalid`] when a session fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        if config.sessions.is_empty() {
            return Err(ConfigError::NoSessions);
        }
        validate_all(&config.sessions)?;
        Ok(config)
    }
}

/// Reads and validates the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read (including when it does not
/// exist), otherwise as for [`ServerConfig::from_toml_str`].
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ServerConfig::from_toml_str(&content)
}

/// Resolves a relative config path.
///
/// A relative path is looked up next to the running executable first, then
/// relative to the working directory.  Absolute paths are returned unchanged.
pub fn resolve_config_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(path)));

    match beside_exe {
        Some(candidate) if candidate.is_file() => candidate,
        _ => path.to_path_buf(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_single_default_session() {
        let cfg = ServerConfig::default();

        assert_eq!(cfg.sessions.len(), 1);
        assert_eq!(cfg.sessions[0].name, "default");
        assert_eq!(cfg.sessions[0].tcp_port, 5000);
        assert_eq!(cfg.server.scheduling, SchedulingMode::Concurrent);
        assert_eq!(cfg.server.queue_depth, 64);
        assert_eq!(cfg.server.log_level, "info");
    }

    #[test]
    fn test_parse_two_sessions_in_order() {
        // Arrange
        let toml_str = r#"
[server]
scheduling = "sequential"

[[session]]
name = "A"
tcp_port = 5000

[[session]]
name = "B"
tcp_port = 5001
serial_send_on = "\n"
"#;

        // Act
        let cfg = ServerConfig::from_toml_str(toml_str).expect("valid config");

        // Assert
        assert_eq!(cfg.server.scheduling, SchedulingMode::Sequential);
        let names: Vec<&str> = cfg.sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(cfg.sessions[1].serial_send_on.byte(), b'\n');
    }

    #[test]
    fn test_server_section_is_optional() {
        let cfg = ServerConfig::from_toml_str("[[session]]\nname = \"only\"\n").unwrap();
        assert_eq!(cfg.server, ServerSection::default());
    }

    #[test]
    fn test_empty_file_is_no_sessions_error() {
        let result = ServerConfig::from_toml_str("");
        assert!(matches!(result, Err(ConfigError::NoSessions)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = ServerConfig::from_toml_str("[[[ not valid toml");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_enum_value_is_parse_error() {
        let toml_str = "[[session]]\nname = \"x\"\nserial_parity = \"purple\"\n";
        assert!(matches!(
            ServerConfig::from_toml_str(toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_duplicate_endpoints_are_invalid() {
        let toml_str = r#"
[[session]]
name = "A"
[[session]]
name = "B"
"#;
        assert!(matches!(
            ServerConfig::from_toml_str(toml_str),
            Err(ConfigError::Invalid(SpecError::DuplicateEndpoint { .. }))
        ));
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/server.cfg");
        assert!(matches!(load_config(&path), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_reads_file_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("sotcp_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("server.cfg");
        std::fs::write(&path, "[[session]]\nname = \"disk\"\ntcp_port = 7000\n").unwrap();

        // Act
        let cfg = load_config(&path).expect("load from disk");

        // Assert
        assert_eq!(cfg.sessions[0].name, "disk");
        assert_eq!(cfg.sessions[0].tcp_port, 7000);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_scheduling_mode_from_str() {
        assert_eq!(
            "Sequential".parse::<SchedulingMode>(),
            Ok(SchedulingMode::Sequential)
        );
        assert_eq!(
            " concurrent ".parse::<SchedulingMode>(),
            Ok(SchedulingMode::Concurrent)
        );
        assert!("round-robin".parse::<SchedulingMode>().is_err());
    }

    #[test]
    fn test_resolve_config_path_keeps_absolute_paths() {
        let abs = std::env::temp_dir().join("server.cfg");
        assert_eq!(resolve_config_path(&abs), abs);
    }

    #[test]
    fn test_resolve_config_path_falls_back_to_relative() {
        let rel = Path::new("surely-not-beside-the-test-binary.cfg");
        assert_eq!(resolve_config_path(rel), rel.to_path_buf());
    }
}
