// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the capfs file-sharing server.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `capfsd`: serve the capfs protocol over TCP.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use capfs::{FileServer, ServerConfig};
use clap::Parser;
use env_logger::Env;
use log::{info, LevelFilter};

/// capfs server command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "capfs file-sharing server", long_about = None)]
struct Cli {
    /// TOML configuration file (falls back to $CAPFS_CONFIG).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory holding file contents.
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Maximum number of files the server tracks.
    #[arg(long)]
    max_files: Option<usize>,

    /// Milliseconds a write waits for its payload (0 waits forever).
    #[arg(long)]
    payload_timeout_ms: Option<u64>,

    /// Append audit lines to this file.
    #[arg(long, value_name = "FILE")]
    audit_log: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn apply(self, mut cfg: ServerConfig) -> ServerConfig {
        if let Some(listen) = self.listen {
            cfg.listen = listen;
        }
        if let Some(dir) = self.storage_dir {
            cfg.storage_dir = dir;
        }
        if let Some(max) = self.max_files {
            cfg.max_files = max;
        }
        if let Some(ms) = self.payload_timeout_ms {
            cfg.payload_timeout_ms = ms;
        }
        if self.audit_log.is_some() {
            cfg.audit_log = self.audit_log;
        }
        cfg
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    init_logging(cli.verbose);
    let cfg = ServerConfig::resolve(cli.config.take())?;
    let cfg = cli.apply(cfg);
    info!(
        "storage {} (max {} files), payload timeout {:?}",
        cfg.storage_dir.display(),
        cfg.max_files,
        cfg.payload_timeout()
    );
    let server = FileServer::bind(&cfg)?;
    server.serve();
    Ok(())
}
