// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse the whitespace-separated capfs command grammar.
// Author: Lukas Bower

//! Command grammar.
//!
//! ```text
//! create <filename> <permissions>
//! read <filename>
//! write <filename> <o|a>
//! mode <filename> <permissions>
//! exit
//! ```

use crate::store::WriteMode;
use crate::FileServerError;

/// A parsed client command.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command {
    /// Blank command line.
    Empty,
    Create { filename: String, permissions: String },
    Read { filename: String },
    Write { filename: String, mode: WriteMode },
    Mode { filename: String, permissions: String },
    /// Close the connection without a response.
    Exit,
}

impl Command {
    /// Parse one command line.
    pub fn parse(line: &str) -> Result<Self, FileServerError> {
        let mut tokens = line.split_whitespace();
        let Some(verb) = tokens.next() else {
            return Ok(Self::Empty);
        };
        let command = match verb {
            "create" => Self::Create {
                filename: required(&mut tokens, "filename")?,
                permissions: required(&mut tokens, "permissions")?,
            },
            "read" => Self::Read {
                filename: required(&mut tokens, "filename")?,
            },
            "write" => {
                let filename = required(&mut tokens, "filename")?;
                let mode = required(&mut tokens, "write mode")?;
                let mode = mode
                    .parse::<WriteMode>()
                    .map_err(|()| FileServerError::protocol("write mode must be o or a"))?;
                Self::Write { filename, mode }
            }
            "mode" => Self::Mode {
                filename: required(&mut tokens, "filename")?,
                permissions: required(&mut tokens, "permissions")?,
            },
            "exit" => Self::Exit,
            other => {
                return Err(FileServerError::protocol(format!(
                    "unsupported command {other}"
                )))
            }
        };
        if let Some(extra) = tokens.next() {
            return Err(FileServerError::protocol(format!(
                "unexpected argument {extra}"
            )));
        }
        Ok(command)
    }
}

fn required<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<String, FileServerError> {
    tokens
        .next()
        .map(str::to_owned)
        .ok_or_else(|| FileServerError::protocol(format!("missing {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol_message(line: &str) -> String {
        match Command::parse(line) {
            Err(FileServerError::Protocol(msg)) => msg,
            other => panic!("expected protocol error for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn parses_every_verb() {
        assert_eq!(
            Command::parse("create a.txt rw----").unwrap(),
            Command::Create {
                filename: "a.txt".into(),
                permissions: "rw----".into()
            }
        );
        assert_eq!(
            Command::parse("  read   a.txt ").unwrap(),
            Command::Read { filename: "a.txt".into() }
        );
        assert_eq!(
            Command::parse("write a.txt a").unwrap(),
            Command::Write {
                filename: "a.txt".into(),
                mode: WriteMode::Append
            }
        );
        assert_eq!(
            Command::parse("mode a.txt rwr---").unwrap(),
            Command::Mode {
                filename: "a.txt".into(),
                permissions: "rwr---".into()
            }
        );
        assert_eq!(Command::parse("exit").unwrap(), Command::Exit);
        assert_eq!(Command::parse("   ").unwrap(), Command::Empty);
    }

    #[test]
    fn permission_strings_are_not_judged_here() {
        // the engine owns permission validation
        assert!(matches!(
            Command::parse("create a.txt rwx---"),
            Ok(Command::Create { .. })
        ));
    }

    #[test]
    fn rejects_bad_arity_and_modes() {
        assert_eq!(protocol_message("read"), "missing filename");
        assert_eq!(protocol_message("create a.txt"), "missing permissions");
        assert_eq!(protocol_message("write a.txt"), "missing write mode");
        assert_eq!(protocol_message("write a.txt x"), "write mode must be o or a");
        assert_eq!(protocol_message("read a b"), "unexpected argument b");
        assert_eq!(protocol_message("ls"), "unsupported command ls");
    }
}
