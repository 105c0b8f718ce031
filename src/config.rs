//! Server Configuration
//!
//! Command-line flags, each with an environment variable fallback.
//!
//! ```text
//! redkite --port 6380 --save "60 1" --dir /var/lib/redkite
//! REDKITE_PORT=6380 REDKITE_SAVE="60 1" redkite
//! ```

use crate::persistence::{SaveRule, SnapshotConfig};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;

/// Default save rules, the same as Redis.
pub const DEFAULT_SAVE_RULES: &str = "900 1 300 10 60 10000";

/// Default snapshot directory.
pub const DEFAULT_DIR: &str = "./data";

/// Default snapshot file name.
pub const DEFAULT_DBFILENAME: &str = "dump.json";

/// Redkite server configuration.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "redkite")]
#[command(version, about = "Redkite - A Redis-compatible key-value server with snapshots", long_about = None)]
pub struct ServerConfig {
    /// Host to bind to
    #[arg(long, env = "REDKITE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "REDKITE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Save rules as "seconds changes" pairs; an empty string disables snapshots
    #[arg(long, env = "REDKITE_SAVE", default_value = DEFAULT_SAVE_RULES)]
    pub save: String,

    /// Directory where the snapshot file is stored
    #[arg(long, env = "REDKITE_DIR", default_value = DEFAULT_DIR)]
    pub dir: PathBuf,

    /// Snapshot file name
    #[arg(long, env = "REDKITE_DBFILENAME", default_value = DEFAULT_DBFILENAME)]
    pub dbfilename: String,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, env = "REDKITE_LOG", default_value = "info")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            save: DEFAULT_SAVE_RULES.to_string(),
            dir: PathBuf::from(DEFAULT_DIR),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Snapshot settings; malformed save rules disable automatic saves.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            dir: self.dir.clone(),
            filename: self.dbfilename.clone(),
            rules: SaveRule::from_config(&self.save),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let parsed = ServerConfig::try_parse_from(["redkite"]).unwrap();
        assert_eq!(parsed, ServerConfig::default());
        assert_eq!(parsed.bind_address(), "127.0.0.1:6379");
    }

    #[test]
    fn test_parse_flags() {
        let config = ServerConfig::try_parse_from([
            "redkite",
            "--port",
            "6380",
            "--save",
            "60 1",
            "--dir",
            "/tmp/redkite",
            "--dbfilename",
            "snap.json",
        ])
        .unwrap();

        assert_eq!(config.port, 6380);
        let snapshot = config.snapshot_config();
        assert_eq!(snapshot.rules, vec![SaveRule::new(60, 1)]);
        assert_eq!(snapshot.path(), PathBuf::from("/tmp/redkite/snap.json"));
    }

    #[test]
    fn test_bad_save_rules_disable_snapshots() {
        let config = ServerConfig {
            save: "60".to_string(),
            ..Default::default()
        };
        assert!(config.snapshot_config().rules.is_empty());
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(ServerConfig::try_parse_from(["redkite", "--port", "not-a-port"]).is_err());
    }
}
