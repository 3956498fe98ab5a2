// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Combine capability checks, per-file exclusion and disk I/O for each file command.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! File mutation engine.
//!
//! Every operation validates existence and access before touching the disk.
//! Writers claim the entry through [`CapabilityTable::try_begin_write`], which
//! checks write permission and then the busy flag under one lock, and the
//! claim is released on every exit path by the [`WriteGuard`] it returns.
//!
//! Readers only observe the busy flag; they take no claim. A writer that
//! claims the file after a reader's check but before its disk read can change
//! the bytes that reader returns.
//!
//! [`WriteGuard`]: crate::table::WriteGuard

use std::sync::Arc;

use capfs_wire::{CodecError, User, MAX_CONTENT_BYTES};
use log::{debug, warn};

use crate::audit::{Action, AuditLog, AuditRecord};
use crate::clock::{Clock, SystemClock};
use crate::perm::{self, Permissions};
use crate::store::{self, FileStore, WriteMode};
use crate::table::{CapabilityEntry, CapabilityTable};
use crate::FileServerError;

/// Status sent after a successful `create`.
pub const STATUS_CREATED: &str = "File created successfully";
/// Status sent after a successful `read`.
pub const STATUS_READ: &str = "File read successful";
/// Status of the preview response that opens the payload phase of a `write`.
pub const STATUS_READY: &str = "Ready for writing the file";
/// Status sent after a successful overwrite.
pub const STATUS_OVERWRITTEN: &str = "File overwritten";
/// Status sent after a successful append.
pub const STATUS_APPENDED: &str = "Content appended";
/// Status sent after a successful `mode`.
pub const STATUS_MODE_CHANGED: &str = "Permissions changed";

/// Connection-side half of the two-phase write exchange.
pub trait WriteExchange {
    /// Send the ready response carrying the current file content.
    fn send_ready(&mut self, preview: &[u8]) -> Result<(), CodecError>;

    /// Wait for the replacement or appended bytes from the client.
    fn receive_payload(&mut self) -> Result<Vec<u8>, CodecError>;
}

/// Result of a completed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Entry after the write was recorded.
    pub entry: CapabilityEntry,
    /// How the payload was applied.
    pub mode: WriteMode,
}

impl WriteOutcome {
    /// Status line reported to the client.
    pub fn status(&self) -> &'static str {
        match self.mode {
            WriteMode::Overwrite => STATUS_OVERWRITTEN,
            WriteMode::Append => STATUS_APPENDED,
        }
    }
}

/// Shared file-operation engine; one instance serves every connection.
pub struct FileEngine {
    table: CapabilityTable,
    store: FileStore,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEngine")
            .field("table", &self.table)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl FileEngine {
    /// Engine stamping modifications with the local system clock.
    pub fn new(table: CapabilityTable, store: FileStore, audit: AuditLog) -> Self {
        Self::with_clock(table, store, audit, Arc::new(SystemClock))
    }

    /// Engine using the supplied clock (primarily for tests).
    pub fn with_clock(
        table: CapabilityTable,
        store: FileStore,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            store,
            audit,
            clock,
        }
    }

    /// Capability table backing this engine.
    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Storage directory backing this engine.
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    fn audit<T>(
        &self,
        user: &User,
        action: Action,
        filename: &str,
        entry: Option<&CapabilityEntry>,
        result: Result<T, FileServerError>,
        success: &str,
    ) -> Result<T, FileServerError> {
        let outcome = match &result {
            Ok(_) => success,
            Err(err) => err.outcome(),
        };
        self.audit
            .record(&AuditRecord::new(user, action, filename, entry, outcome));
        result
    }

    /// Create an empty file owned by `user`.
    pub fn create(
        &self,
        user: &User,
        filename: &str,
        permissions: &str,
    ) -> Result<CapabilityEntry, FileServerError> {
        let result = self.create_inner(user, filename, permissions);
        let entry = result.as_ref().ok().cloned();
        self.audit(user, Action::Create, filename, entry.as_ref(), result, "success")
    }

    fn create_inner(
        &self,
        user: &User,
        filename: &str,
        permissions: &str,
    ) -> Result<CapabilityEntry, FileServerError> {
        check_filename(filename)?;
        let permissions: Permissions = permissions.parse()?;
        let entry = CapabilityEntry::new(filename, user, permissions, self.clock.now());
        self.table.insert_with(entry.clone(), |entry| {
            self.store
                .create_empty(&entry.filename)
                .map_err(|err| FileServerError::io(Action::Create, err))
        })?;
        debug!("{} created {} ({})", user.name, filename, permissions);
        Ok(entry)
    }

    /// Return up to [`MAX_CONTENT_BYTES`] of the file content.
    pub fn read(&self, user: &User, filename: &str) -> Result<Vec<u8>, FileServerError> {
        let entry = match check_filename(filename).map(|()| self.table.lookup(filename)) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return self.audit(user, Action::Read, filename, None, Err(FileServerError::NotFound), "")
            }
            Err(err) => return self.audit(user, Action::Read, filename, None, Err(err), ""),
        };
        let result = if entry.is_busy() {
            Err(FileServerError::Busy)
        } else if !perm::can_read(&entry, user) {
            Err(FileServerError::PermissionDenied)
        } else {
            self.store
                .read_prefix(filename, MAX_CONTENT_BYTES)
                .map_err(|err| FileServerError::io(Action::Read, err))
        };
        self.audit(user, Action::Read, filename, Some(&entry), result, "success")
    }

    /// Two-phase write: claim the file, preview it, receive the payload, apply it.
    pub fn write(
        &self,
        user: &User,
        filename: &str,
        mode: WriteMode,
        exchange: &mut dyn WriteExchange,
    ) -> Result<WriteOutcome, FileServerError> {
        let entry = match check_filename(filename).map(|()| self.table.lookup(filename)) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return self.audit(user, Action::Write, filename, None, Err(FileServerError::NotFound), "")
            }
            Err(err) => return self.audit(user, Action::Write, filename, None, Err(err), ""),
        };
        let result = self.write_inner(user, &entry, mode, exchange);
        let audited = match &result {
            Ok(outcome) => outcome.entry.clone(),
            Err(_) => self.table.lookup(filename).unwrap_or(entry),
        };
        self.audit(user, Action::Write, filename, Some(&audited), result, "success")
    }

    fn write_inner(
        &self,
        user: &User,
        entry: &CapabilityEntry,
        mode: WriteMode,
        exchange: &mut dyn WriteExchange,
    ) -> Result<WriteOutcome, FileServerError> {
        let guard = self.table.try_begin_write(&entry.filename, user)?;
        let filename = guard.entry().filename.as_str();

        let preview = self
            .store
            .read_prefix(filename, MAX_CONTENT_BYTES)
            .map_err(|err| FileServerError::io(Action::Write, err))?;
        exchange.send_ready(&preview).map_err(|err| {
            warn!("{filename}: ready response not delivered: {err}");
            FileServerError::ReceiveFailed(err.to_string())
        })?;
        let payload = exchange.receive_payload().map_err(|err| {
            warn!("{filename}: payload not received: {err}");
            FileServerError::ReceiveFailed(err.to_string())
        })?;
        if payload.is_empty() {
            return Err(FileServerError::ReceiveFailed("empty payload".into()));
        }

        let size = self
            .store
            .write(filename, &payload, mode)
            .map_err(|err| FileServerError::io(Action::Write, err))?;
        let entry = guard.commit(size, self.clock.now());
        debug!(
            "{} wrote {} bytes to {} ({:?})",
            user.name,
            payload.len(),
            entry.filename,
            mode
        );
        Ok(WriteOutcome { entry, mode })
    }

    /// Replace the permissions of a file owned by `user`.
    pub fn change_mode(
        &self,
        user: &User,
        filename: &str,
        permissions: &str,
    ) -> Result<CapabilityEntry, FileServerError> {
        let entry = match check_filename(filename).map(|()| self.table.lookup(filename)) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return self.audit(user, Action::Mode, filename, None, Err(FileServerError::NotFound), "")
            }
            Err(err) => return self.audit(user, Action::Mode, filename, None, Err(err), ""),
        };
        let result = permissions
            .parse::<Permissions>()
            .map_err(FileServerError::from)
            .and_then(|perms| self.table.update_permissions(filename, user, perms));
        let audited = result.as_ref().ok().cloned().unwrap_or(entry);
        self.audit(
            user,
            Action::Mode,
            filename,
            Some(&audited),
            result,
            "permissions changed",
        )
    }
}

fn check_filename(filename: &str) -> Result<(), FileServerError> {
    store::validate_filename(filename).map_err(FileServerError::protocol)
}
