// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library root for the capfs capability-table file server.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! capfs: a multi-client file-sharing server.
//!
//! Clients connect over TCP and send fixed-size requests that carry a
//! self-reported user/group pair and one command (`create`, `read`, `write`,
//! `mode`). The server keeps an in-memory [`table::CapabilityTable`] with the
//! owner, group, permission bits, size, modification time and busy flag of
//! every file it created, and serialises writers per file through that table.
//! File bytes live in a plain storage directory ([`store::FileStore`]).
//!
//! The table is not persisted: after a restart the files remain on disk but
//! the server no longer knows about them.

use std::io;

use thiserror::Error;

pub mod audit;
pub mod client;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod handler;
pub mod perm;
pub mod server;
pub mod store;
pub mod table;

pub use audit::Action;
pub use capfs_wire::{Request, Response, User};
pub use config::ServerConfig;
pub use engine::{FileEngine, WriteExchange, WriteOutcome};
pub use perm::Permissions;
pub use server::FileServer;
pub use store::WriteMode;
pub use table::{CapabilityEntry, CapabilityTable};

/// Failures reported to clients. The `Display` form is the response status.
#[derive(Debug, Error)]
pub enum FileServerError {
    /// Malformed command syntax or filename.
    #[error("Invalid command: {0}")]
    Protocol(String),
    /// Permission string failed validation.
    #[error("Invalid permissions format.")]
    InvalidPermissions(#[from] perm::PermissionError),
    /// No entry for the filename.
    #[error("File not found")]
    NotFound,
    /// An entry with the filename already exists.
    #[error("File already exists")]
    AlreadyExists,
    /// The table holds its maximum number of entries.
    #[error("File limit reached")]
    LimitReached,
    /// A write is in progress on the file.
    #[error("File is modifying")]
    Busy,
    /// The caller lacks the required access.
    #[error("Permission denied")]
    PermissionDenied,
    /// The write payload was not obtained from the client.
    #[error("Failed to receive content")]
    ReceiveFailed(String),
    /// An on-disk operation failed.
    #[error("Failed to {action} file")]
    Io {
        /// Operation that touched the disk.
        action: Action,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl FileServerError {
    /// Build a protocol error from any message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn io(action: Action, source: io::Error) -> Self {
        Self::Io { action, source }
    }

    /// Short outcome label used in audit lines.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "invalid command",
            Self::InvalidPermissions(_) => "invalid permissions",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::LimitReached => "limit reached",
            Self::Busy => "busy",
            Self::PermissionDenied => "permission denied",
            Self::ReceiveFailed(_) => "receive failed",
            Self::Io { .. } => "failed",
        }
    }
}
