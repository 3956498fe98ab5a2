// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Accept TCP clients and run one connection handler thread per client.
// Author: Lukas Bower

//! TCP listener.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::audit::AuditLog;
use crate::config::ServerConfig;
use crate::engine::FileEngine;
use crate::handler::ConnectionHandler;
use crate::store::FileStore;
use crate::table::CapabilityTable;

/// Listener plus the engine shared by every connection.
#[derive(Debug)]
pub struct FileServer {
    listener: TcpListener,
    engine: Arc<FileEngine>,
    payload_timeout: Option<Duration>,
    next_conn: AtomicU64,
}

impl FileServer {
    /// Prepare storage, audit sink and an empty table, then bind.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let store = FileStore::open(&config.storage_dir).with_context(|| {
            format!(
                "failed to prepare storage dir {}",
                config.storage_dir.display()
            )
        })?;
        let audit = match &config.audit_log {
            Some(path) => AuditLog::with_file(path)
                .with_context(|| format!("failed to open audit log {}", path.display()))?,
            None => AuditLog::log_only(),
        };
        let engine = FileEngine::new(CapabilityTable::new(config.max_files), store, audit);
        let listener = TcpListener::bind(config.listen)
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::from_parts(
            listener,
            Arc::new(engine),
            config.payload_timeout(),
        ))
    }

    /// Assemble a server from an already bound listener.
    pub fn from_parts(
        listener: TcpListener,
        engine: Arc<FileEngine>,
        payload_timeout: Option<Duration>,
    ) -> Self {
        Self {
            listener,
            engine,
            payload_timeout,
            next_conn: AtomicU64::new(1),
        }
    }

    /// Bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Engine shared by every connection.
    pub fn engine(&self) -> Arc<FileEngine> {
        self.engine.clone()
    }

    /// Accept connections forever.
    pub fn serve(&self) {
        match self.local_addr() {
            Ok(addr) => info!("capfs listening on {addr}"),
            Err(err) => warn!("capfs listening on unknown address: {err}"),
        }
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_handler(stream),
                Err(err) => error!("accept failed: {err}"),
            }
        }
    }

    /// Run [`FileServer::serve`] on a background thread.
    pub fn spawn(self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.local_addr()?;
        let handle = thread::Builder::new()
            .name("capfs-accept".into())
            .spawn(move || self.serve())?;
        Ok((addr, handle))
    }

    fn spawn_handler(&self, stream: TcpStream) {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("conn-{id}"));
        let engine = self.engine.clone();
        let timeout = self.payload_timeout;
        let spawned = thread::Builder::new()
            .name(format!("capfs-conn-{id}"))
            .spawn(move || {
                // errors are already logged by the handler
                let _ = ConnectionHandler::new(stream, peer, engine, timeout).run();
            });
        if let Err(err) = spawned {
            error!("failed to spawn handler thread: {err}");
        }
    }
}
