// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Hold per-file ownership, permission and busy state shared by every connection.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Capability table.
//!
//! One table lives for the whole process and is shared by every connection
//! handler. All composite operations run under a single table lock, so the
//! existence check, capacity check and busy check are never separable from
//! the mutation that follows them. The busy flag can only be raised through
//! [`CapabilityTable::try_begin_write`], which checks the caller's write
//! permission in the same critical section, and is lowered when the returned
//! [`WriteGuard`] is committed or dropped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use capfs_wire::User;
use log::debug;

use crate::clock::Timestamp;
use crate::perm::{self, Permissions};
use crate::FileServerError;

/// Default, and largest, number of files tracked by the table.
pub const DEFAULT_CAPACITY: usize = 100;

/// Metadata governing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    /// Unique key within the table.
    pub filename: String,
    /// Name of the creating user.
    pub owner: String,
    /// Group of the creating user.
    pub group: String,
    /// Group/other access bits (owner bits are informational).
    pub permissions: Permissions,
    /// Last measured on-disk size.
    pub size_bytes: u64,
    /// Last successful mutation time.
    pub last_modified: Timestamp,
    busy: bool,
}

impl CapabilityEntry {
    /// New idle, empty entry owned by `creator`.
    pub fn new(
        filename: impl Into<String>,
        creator: &User,
        permissions: Permissions,
        created: Timestamp,
    ) -> Self {
        Self {
            filename: filename.into(),
            owner: creator.name.clone(),
            group: creator.group.clone(),
            permissions,
            size_bytes: 0,
            last_modified: created,
            busy: false,
        }
    }

    /// Whether a write held the file at the time this snapshot was taken.
    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Process-wide registry of capability entries.
#[derive(Debug)]
pub struct CapabilityTable {
    entries: Mutex<HashMap<String, CapabilityEntry>>,
    capacity: usize,
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CapabilityTable {
    /// Empty table accepting at most `capacity` entries, never more than
    /// [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.min(DEFAULT_CAPACITY),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CapabilityEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no file has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Snapshot of the entry for `filename`.
    pub fn lookup(&self, filename: &str) -> Option<CapabilityEntry> {
        self.entries().get(filename).cloned()
    }

    /// Snapshot of every entry ordered by filename.
    pub fn snapshot(&self) -> Vec<CapabilityEntry> {
        let mut all: Vec<_> = self.entries().values().cloned().collect();
        all.sort_by(|a, b| a.filename.cmp(&b.filename));
        all
    }

    /// Insert a new entry, enforcing uniqueness and capacity.
    pub fn insert(&self, entry: CapabilityEntry) -> Result<(), FileServerError> {
        self.insert_with(entry, |_| Ok(()))
    }

    /// Insert a new entry after `init` succeeds.
    ///
    /// `init` runs under the table lock once the uniqueness and capacity checks
    /// pass, so no competing insert for the same name can interleave with it.
    /// If `init` fails the table is left untouched.
    pub fn insert_with<F>(&self, entry: CapabilityEntry, init: F) -> Result<(), FileServerError>
    where
        F: FnOnce(&CapabilityEntry) -> Result<(), FileServerError>,
    {
        let mut entries = self.entries();
        if entries.contains_key(&entry.filename) {
            return Err(FileServerError::AlreadyExists);
        }
        if entries.len() >= self.capacity {
            return Err(FileServerError::LimitReached);
        }
        init(&entry)?;
        debug!("capability entry added for {}", entry.filename);
        entries.insert(entry.filename.clone(), entry);
        Ok(())
    }

    /// Atomically claim exclusive write access to `filename` for `writer`.
    ///
    /// Permission is judged against the live entry before the busy flag, so a
    /// concurrent `mode` either lands before the claim or after it. Fails with
    /// `NotFound`, `PermissionDenied` or `Busy`; never blocks.
    pub fn try_begin_write(
        &self,
        filename: &str,
        writer: &User,
    ) -> Result<WriteGuard<'_>, FileServerError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(filename)
            .ok_or(FileServerError::NotFound)?;
        if !perm::can_write(entry, writer) {
            return Err(FileServerError::PermissionDenied);
        }
        if entry.busy {
            return Err(FileServerError::Busy);
        }
        entry.busy = true;
        Ok(WriteGuard {
            table: self,
            entry: entry.clone(),
            released: false,
        })
    }

    fn end_write(&self, filename: &str, update: Option<(u64, Timestamp)>) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(filename) {
            if let Some((size, modified)) = update {
                entry.size_bytes = size;
                entry.last_modified = modified;
            }
            entry.busy = false;
        }
    }

    /// Replace the permissions of `filename` on behalf of its owner.
    ///
    /// Returns the updated entry.
    pub fn update_permissions(
        &self,
        filename: &str,
        caller: &User,
        permissions: Permissions,
    ) -> Result<CapabilityEntry, FileServerError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(filename)
            .ok_or(FileServerError::NotFound)?;
        if entry.owner != caller.name {
            return Err(FileServerError::PermissionDenied);
        }
        entry.permissions = permissions;
        Ok(entry.clone())
    }
}

/// Exclusive write claim on one entry.
///
/// The busy flag is cleared exactly once: by [`WriteGuard::commit`], which also
/// records the new size and timestamp, or otherwise when the guard is dropped.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    table: &'a CapabilityTable,
    entry: CapabilityEntry,
    released: bool,
}

impl WriteGuard<'_> {
    /// Entry as it was when the claim was taken.
    pub fn entry(&self) -> &CapabilityEntry {
        &self.entry
    }

    /// Record a completed write and release the claim.
    pub fn commit(mut self, size_bytes: u64, modified: Timestamp) -> CapabilityEntry {
        self.table
            .end_write(&self.entry.filename, Some((size_bytes, modified)));
        self.released = true;
        self.entry.size_bytes = size_bytes;
        self.entry.last_modified = modified;
        self.entry.busy = false;
        self.entry.clone()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.table.end_write(&self.entry.filename, None);
            self.released = true;
        }
    }
}
