// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Confine capfs file bytes to a single storage directory.
// Author: Lukas Bower

//! On-disk byte storage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Longest accepted filename in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// How a write payload is applied to an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the file content (`o`).
    Overwrite,
    /// Extend the file content (`a`).
    Append,
}

impl FromStr for WriteMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "o" => Ok(Self::Overwrite),
            "a" => Ok(Self::Append),
            _ => Err(()),
        }
    }
}

impl WriteMode {
    /// Wire token for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "o",
            Self::Append => "a",
        }
    }
}

/// Check that `name` is a single plain path component.
pub fn validate_filename(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty filename");
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err("filename too long");
    }
    if name == "." || name == ".." {
        return Err("reserved filename");
    }
    if name.contains(['/', '\\', '\0']) {
        return Err("filename must not contain path separators");
    }
    Ok(())
}

/// Directory holding one plain file per capability entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Use `root` as the storage directory, creating it when missing.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create `name` as an empty file, truncating leftovers from earlier runs.
    pub fn create_empty(&self, name: &str) -> io::Result<()> {
        File::create(self.path_of(name)).map(drop)
    }

    /// Read at most `limit` bytes from the start of `name`.
    pub fn read_prefix(&self, name: &str, limit: usize) -> io::Result<Vec<u8>> {
        let file = File::open(self.path_of(name))?;
        let mut data = Vec::new();
        file.take(limit as u64).read_to_end(&mut data)?;
        Ok(data)
    }

    /// Apply `data` to `name` and return the resulting on-disk size.
    pub fn write(&self, name: &str, data: &[u8], mode: WriteMode) -> io::Result<u64> {
        let path = self.path_of(name);
        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Overwrite => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        let mut file = options.open(&path)?;
        file.write_all(data)?;
        file.flush()?;
        drop(file);
        self.size(name)
    }

    /// Current on-disk size of `name`.
    pub fn size(&self, name: &str) -> io::Result<u64> {
        fs::metadata(self.path_of(name)).map(|meta| meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_path_like_names() {
        assert!(validate_filename("notes.txt").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a\\b").is_err());
        assert!(validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn overwrite_then_append() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("file")).unwrap();
        store.create_empty("a.txt").unwrap();
        assert_eq!(store.size("a.txt").unwrap(), 0);
        assert_eq!(store.write("a.txt", b"hello", WriteMode::Overwrite).unwrap(), 5);
        assert_eq!(store.write("a.txt", b" world", WriteMode::Append).unwrap(), 11);
        assert_eq!(store.read_prefix("a.txt", 64).unwrap(), b"hello world");
        assert_eq!(store.write("a.txt", b"bye", WriteMode::Overwrite).unwrap(), 3);
        assert_eq!(store.read_prefix("a.txt", 64).unwrap(), b"bye");
    }

    #[test]
    fn read_is_bounded() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.create_empty("big").unwrap();
        store.write("big", &[b'z'; 100], WriteMode::Overwrite).unwrap();
        assert_eq!(store.read_prefix("big", 10).unwrap().len(), 10);
    }

    #[test]
    fn create_truncates_leftovers() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("old"), b"stale").unwrap();
        store.create_empty("old").unwrap();
        assert_eq!(store.size("old").unwrap(), 0);
    }

    #[test]
    fn write_mode_tokens() {
        assert_eq!("o".parse::<WriteMode>(), Ok(WriteMode::Overwrite));
        assert_eq!("a".parse::<WriteMode>(), Ok(WriteMode::Append));
        assert!("x".parse::<WriteMode>().is_err());
        assert_eq!(WriteMode::Append.as_str(), "a");
    }
}
