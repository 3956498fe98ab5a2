// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load capfs server settings from TOML with environment and CLI overrides.
// Author: Lukas Bower

//! Server configuration.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::table::DEFAULT_CAPACITY;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "CAPFS_CONFIG";
/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9003";
/// Default storage directory.
pub const DEFAULT_STORAGE_DIR: &str = "./file";
/// Default wait for a write payload, in milliseconds.
pub const DEFAULT_PAYLOAD_TIMEOUT_MS: u64 = 30_000;

/// Runtime settings for `capfsd`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the listener binds.
    pub listen: SocketAddr,
    /// Directory holding file bytes.
    pub storage_dir: PathBuf,
    /// Capability table capacity.
    pub max_files: usize,
    /// How long a write waits for its payload; 0 waits forever.
    pub payload_timeout_ms: u64,
    /// Optional append-only audit file.
    pub audit_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9003)),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            max_files: DEFAULT_CAPACITY,
            payload_timeout_ms: DEFAULT_PAYLOAD_TIMEOUT_MS,
            audit_log: None,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a TOML file, rebasing relative paths on its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        cfg.rebase_paths(path);
        Ok(cfg)
    }

    /// Reject values the server cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_files == 0 || self.max_files > DEFAULT_CAPACITY {
            bail!(
                "max_files must be between 1 and {DEFAULT_CAPACITY}, got {}",
                self.max_files
            );
        }
        Ok(())
    }

    /// Load from `cli_path`, else from `$CAPFS_CONFIG`, else use defaults.
    pub fn resolve(cli_path: Option<PathBuf>) -> Result<Self> {
        match config_path(cli_path) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Payload wait as a duration, `None` when disabled.
    pub fn payload_timeout(&self) -> Option<Duration> {
        (self.payload_timeout_ms > 0).then(|| Duration::from_millis(self.payload_timeout_ms))
    }

    fn rebase_paths(&mut self, path: &Path) {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        self.storage_dir = join_base(base, &self.storage_dir);
        if let Some(audit) = &mut self.audit_log {
            *audit = join_base(base, audit);
        }
    }
}

fn join_base(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    if cli_path.is_some() {
        return cli_path;
    }
    env::var(CONFIG_ENV)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_classic_server() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(cfg.max_files, 100);
        assert_eq!(cfg.payload_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg, ServerConfig::from_toml_str("").unwrap());
    }

    #[test]
    fn zero_timeout_disables_wait_limit() {
        let cfg = ServerConfig::from_toml_str("payload_timeout_ms = 0").unwrap();
        assert_eq!(cfg.payload_timeout(), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ServerConfig::from_toml_str("max_file = 3").is_err());
    }

    #[test]
    fn load_rebases_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capfs.toml");
        fs::write(
            &path,
            "listen = '127.0.0.1:7000'\nstorage_dir = 'data'\naudit_log = '/var/log/capfs.log'\nmax_files = 5\n",
        )
        .unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.listen.port(), 7000);
        assert_eq!(cfg.storage_dir, dir.path().join("data"));
        assert_eq!(cfg.audit_log, Some(PathBuf::from("/var/log/capfs.log")));
        assert_eq!(cfg.max_files, 5);
    }

    #[test]
    fn max_files_is_bounded() {
        for bad in ["max_files = 101", "max_files = 0"] {
            let cfg = ServerConfig::from_toml_str(bad).unwrap();
            assert!(cfg.validate().is_err(), "{bad}");
        }
        assert!(ServerConfig::from_toml_str("max_files = 100")
            .unwrap()
            .validate()
            .is_ok());

        let dir = tempdir().unwrap();
        let path = dir.path().join("capfs.toml");
        fs::write(&path, "max_files = 500\n").unwrap();
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_files must be between 1 and 100"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = ServerConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    #[serial]
    fn resolve_prefers_cli_over_env() {
        let dir = tempdir().unwrap();
        let from_env = dir.path().join("env.toml");
        let from_cli = dir.path().join("cli.toml");
        fs::write(&from_env, "max_files = 7\n").unwrap();
        fs::write(&from_cli, "max_files = 9\n").unwrap();

        env::set_var(CONFIG_ENV, &from_env);
        assert_eq!(ServerConfig::resolve(None).unwrap().max_files, 7);
        assert_eq!(ServerConfig::resolve(Some(from_cli)).unwrap().max_files, 9);
        env::remove_var(CONFIG_ENV);
        assert_eq!(ServerConfig::resolve(None).unwrap().max_files, 100);
    }
}
