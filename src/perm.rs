// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse, render and evaluate six-symbol capfs permission strings.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Permission codec.
//!
//! A permission string has six symbols laid out as owner, group and other
//! pairs, e.g. `rw-r--`. Even positions carry `r` or `-`, odd positions carry
//! `w` or `-`. The owner bits are recorded but never consulted: the creator of
//! a file always has full access to it.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use capfs_wire::User;

use crate::table::CapabilityEntry;

/// Number of symbols in a permission string.
pub const PERMISSION_LEN: usize = 6;

bitflags! {
    /// Decoded permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        /// `r` at position 0.
        const OWNER_READ = 0b10_0000;
        /// `w` at position 1.
        const OWNER_WRITE = 0b01_0000;
        /// `r` at position 2.
        const GROUP_READ = 0b00_1000;
        /// `w` at position 3.
        const GROUP_WRITE = 0b00_0100;
        /// `r` at position 4.
        const OTHER_READ = 0b00_0010;
        /// `w` at position 5.
        const OTHER_WRITE = 0b00_0001;
    }
}

const SLOTS: [(Permissions, char); PERMISSION_LEN] = [
    (Permissions::OWNER_READ, 'r'),
    (Permissions::OWNER_WRITE, 'w'),
    (Permissions::GROUP_READ, 'r'),
    (Permissions::GROUP_WRITE, 'w'),
    (Permissions::OTHER_READ, 'r'),
    (Permissions::OTHER_WRITE, 'w'),
];

/// Reasons a permission string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    /// The string does not have exactly six symbols.
    #[error("expected {PERMISSION_LEN} symbols, found {0}")]
    Length(usize),
    /// A symbol is not the letter for its slot or `-`.
    #[error("unexpected symbol {found:?} at position {position}")]
    Symbol {
        /// Zero-based position of the offending symbol.
        position: usize,
        /// The symbol that was found.
        found: char,
    },
}

/// Kind of access requested on a file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    /// Read the file content.
    Read,
    /// Overwrite or append to the file.
    Write,
}

impl FromStr for Permissions {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let symbols: Vec<char> = s.chars().collect();
        if symbols.len() != PERMISSION_LEN {
            return Err(PermissionError::Length(symbols.len()));
        }
        let mut perms = Permissions::empty();
        for (position, (&found, &(bit, letter))) in symbols.iter().zip(SLOTS.iter()).enumerate() {
            if found == letter {
                perms |= bit;
            } else if found != '-' {
                return Err(PermissionError::Symbol { position, found });
            }
        }
        Ok(perms)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, letter) in SLOTS {
            let symbol = if self.contains(bit) { letter } else { '-' };
            write!(f, "{symbol}")?;
        }
        Ok(())
    }
}

/// Report whether `perm` is a well-formed permission string.
pub fn validate(perm: &str) -> bool {
    perm.parse::<Permissions>().is_ok()
}

/// Decide whether `user` may perform `access` on the file described by `entry`.
pub fn allows(entry: &CapabilityEntry, user: &User, access: Access) -> bool {
    if user.name == entry.owner {
        return true;
    }
    let (group_bit, other_bit) = match access {
        Access::Read => (Permissions::GROUP_READ, Permissions::OTHER_READ),
        Access::Write => (Permissions::GROUP_WRITE, Permissions::OTHER_WRITE),
    };
    let perms = entry.permissions;
    (user.group == entry.group && perms.contains(group_bit)) || perms.contains(other_bit)
}

/// Read decision for `user` on `entry`.
pub fn can_read(entry: &CapabilityEntry, user: &User) -> bool {
    allows(entry, user, Access::Read)
}

/// Write decision for `user` on `entry`.
pub fn can_write(entry: &CapabilityEntry, user: &User) -> bool {
    allows(entry, user, Access::Write)
}
