// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Record every file operation outcome to the log and an optional append-only file.
// Author: Lukas Bower

//! Best-effort audit trail.
//!
//! Each terminal outcome of a file operation produces one line on the
//! `capfs::audit` log target. When an audit file is configured the same line
//! is appended there with an RFC 3339 prefix. Failing to append never fails the
//! request that produced the record.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use capfs_wire::User;
use chrono::Utc;
use log::{info, warn};

use crate::clock::Timestamp;
use crate::perm::Permissions;
use crate::table::CapabilityEntry;

/// Log target carrying audit lines.
pub const AUDIT_TARGET: &str = "capfs::audit";

/// Operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `create`
    Create,
    /// `read`
    Read,
    /// `write`
    Write,
    /// `mode`
    Mode,
}

impl Action {
    /// Lower-case verb used on the wire and in audit lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Write => "write",
            Action::Mode => "mode",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit line.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    /// Caller identity.
    pub user: &'a User,
    /// Operation attempted.
    pub action: Action,
    /// Target filename as requested.
    pub filename: &'a str,
    /// Known size of the file, 0 when there is no entry.
    pub size_bytes: u64,
    /// Outcome label such as `success` or `permission denied`.
    pub outcome: &'a str,
    /// Permissions of the entry, if one exists.
    pub permissions: Option<Permissions>,
    /// Modification time of the entry, if one exists.
    pub last_modified: Option<Timestamp>,
}

impl<'a> AuditRecord<'a> {
    /// Record for an operation on `filename`, filling metadata from `entry`.
    pub fn new(
        user: &'a User,
        action: Action,
        filename: &'a str,
        entry: Option<&CapabilityEntry>,
        outcome: &'a str,
    ) -> Self {
        Self {
            user,
            action,
            filename,
            size_bytes: entry.map_or(0, |e| e.size_bytes),
            outcome,
            permissions: entry.map(|e| e.permissions),
            last_modified: entry.map(|e| e.last_modified),
        }
    }
}

impl fmt::Display for AuditRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let permissions = self.permissions.unwrap_or(Permissions::empty());
        write!(
            f,
            "User: {}, Group: {}, Action: {}, File: {}, {}, Status: {}, {}, ",
            self.user.name,
            self.user.group,
            self.action,
            self.filename,
            self.size_bytes,
            self.outcome,
            permissions,
        )?;
        match self.last_modified {
            Some(ts) => write!(f, "{ts}"),
            None => f.write_str("-"),
        }
    }
}

/// Sink for audit records.
#[derive(Debug, Default)]
pub struct AuditLog {
    file: Option<(PathBuf, Mutex<File>)>,
}

impl AuditLog {
    /// Audit to the log facade only.
    pub fn log_only() -> Self {
        Self::default()
    }

    /// Audit to the log facade and append to `path`.
    pub fn with_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some((path.to_path_buf(), Mutex::new(file))),
        })
    }

    /// Append-only file receiving records, if configured.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    /// Emit `record`. Never fails.
    pub fn record(&self, record: &AuditRecord<'_>) {
        info!(target: AUDIT_TARGET, "{record}");
        if let Some((path, file)) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), record) {
                warn!("audit append to {} failed: {err}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_entry() -> CapabilityEntry {
        CapabilityEntry::new(
            "a.txt",
            &User::new("alice", "CSE"),
            "rw-r--".parse().unwrap(),
            Timestamp::from_ymd_hm(2025, 5, 6, 7, 8).unwrap(),
        )
    }

    #[test]
    fn formats_entry_metadata() {
        let user = User::new("bob", "CSE");
        let entry = sample_entry();
        let line = AuditRecord::new(&user, Action::Read, "a.txt", Some(&entry), "success")
            .to_string();
        assert_eq!(
            line,
            "User: bob, Group: CSE, Action: read, File: a.txt, 0, Status: success, rw-r--, 2025/05/06 07:08"
        );
    }

    #[test]
    fn formats_missing_entry() {
        let user = User::new("bob", "CSE");
        let line = AuditRecord::new(&user, Action::Write, "gone", None, "not found").to_string();
        assert!(line.ends_with("Status: not found, ------, -"), "{line}");
    }

    #[test]
    fn appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit").join("capfs.log");
        let log = AuditLog::with_file(&path).unwrap();
        let user = User::new("alice", "CSE");
        let entry = sample_entry();
        log.record(&AuditRecord::new(&user, Action::Create, "a.txt", Some(&entry), "success"));
        log.record(&AuditRecord::new(&user, Action::Mode, "a.txt", Some(&entry), "permissions changed"));
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("Action: create"));
        assert!(lines[1].contains("Status: permissions changed"));
        assert_eq!(log.path(), Some(path.as_path()));
    }
}
