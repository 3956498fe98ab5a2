// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Fixed-size request/response/payload records exchanged with capfs clients.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Fixed-size wire records for the capfs file-sharing protocol.
//!
//! Every message on a connection is one of three records with a constant
//! length: a [`Request`] sent by the client, a [`Response`] sent by the server,
//! and the raw write payload sent by the client after the server has answered
//! a `write` command with a ready response. String fields are NUL-padded and
//! end at the first NUL byte, so no length prefix or delimiter is needed.

use std::borrow::Cow;
use std::io::{self, Read, Write};

/// Bytes reserved for the user name field.
pub const NAME_LEN: usize = 256;
/// Bytes reserved for the group name field.
pub const GROUP_LEN: usize = 50;
/// Bytes reserved for the command line carried by a request.
pub const COMMAND_LEN: usize = 1024;
/// Bytes reserved for the response status string.
pub const STATUS_LEN: usize = 256;
/// Bytes reserved for the response content.
pub const CONTENT_LEN: usize = 1024;
/// Length of the standalone write payload record.
pub const PAYLOAD_LEN: usize = 37_690;

/// Encoded size of a [`User`].
pub const USER_RECORD_LEN: usize = NAME_LEN + GROUP_LEN;
/// Encoded size of a [`Request`].
pub const REQUEST_RECORD_LEN: usize = USER_RECORD_LEN + COMMAND_LEN;
/// Encoded size of a [`Response`].
pub const RESPONSE_RECORD_LEN: usize = STATUS_LEN + CONTENT_LEN;

/// Largest user name that fits the record.
pub const MAX_NAME_BYTES: usize = NAME_LEN - 1;
/// Largest group name that fits the record.
pub const MAX_GROUP_BYTES: usize = GROUP_LEN - 1;
/// Largest response content delivered to a client; longer content is truncated.
pub const MAX_CONTENT_BYTES: usize = CONTENT_LEN - 1;
/// Largest write payload a client may send.
pub const MAX_PAYLOAD_BYTES: usize = PAYLOAD_LEN - 1;

/// Errors produced while encoding or decoding wire records.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The peer closed the stream part-way through a record.
    #[error("truncated record: expected {expected} bytes, received {received}")]
    Truncated {
        /// Record length the reader was waiting for.
        expected: usize,
        /// Bytes received before end of stream.
        received: usize,
    },
    /// The peer closed the stream before a required record arrived.
    #[error("connection closed by peer")]
    Closed,
    /// A string field held bytes that are not UTF-8.
    #[error("invalid utf8 in {0} field")]
    InvalidUtf8(&'static str),
    /// A value did not fit its fixed-size field.
    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Length of the supplied value.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },
    /// A value contained a NUL byte, which would end the field early.
    #[error("{0} contains a NUL byte")]
    EmbeddedNul(&'static str),
    /// The record length did not match the expected layout.
    #[error("record is {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// Length required by the layout.
        expected: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },
    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Identity presented with every request. The server trusts it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// Self-reported user name.
    pub name: String,
    /// Self-reported group name.
    pub group: String,
}

impl User {
    /// Build a user from name and group labels.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

/// A single client command together with the identity issuing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Identity of the caller.
    pub user: User,
    /// Whitespace separated command line, e.g. `read notes.txt`.
    pub command: String,
}

impl Request {
    /// Build a request for `user` carrying `command`.
    pub fn new(user: User, command: impl Into<String>) -> Self {
        Self {
            user,
            command: command.into(),
        }
    }

    /// Encode into a [`REQUEST_RECORD_LEN`] byte record.
    ///
    /// Fails when a field does not fit; requests are never silently truncated.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut record = vec![0u8; REQUEST_RECORD_LEN];
        put_exact(&mut record[..NAME_LEN], "name", self.user.name.as_bytes())?;
        put_exact(
            &mut record[NAME_LEN..USER_RECORD_LEN],
            "group",
            self.user.group.as_bytes(),
        )?;
        put_exact(
            &mut record[USER_RECORD_LEN..],
            "command",
            self.command.as_bytes(),
        )?;
        Ok(record)
    }

    /// Decode a request record.
    pub fn decode(record: &[u8]) -> Result<Self, CodecError> {
        check_len(record, REQUEST_RECORD_LEN)?;
        let name = get_str(&record[..NAME_LEN], "name")?;
        let group = get_str(&record[NAME_LEN..USER_RECORD_LEN], "group")?;
        let command = get_str(&record[USER_RECORD_LEN..], "command")?;
        Ok(Self {
            user: User { name, group },
            command,
        })
    }
}

/// Server reply to a request: a status line plus optional content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Human readable outcome, e.g. `File read successful`.
    pub status: String,
    /// File bytes or informational text; empty for most outcomes.
    pub content: Vec<u8>,
}

impl Response {
    /// Build a response with content.
    pub fn new(status: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            status: status.into(),
            content: content.into(),
        }
    }

    /// Build a response with empty content.
    pub fn status(status: impl Into<String>) -> Self {
        Self::new(status, Vec::new())
    }

    /// Content decoded as text, replacing invalid sequences.
    pub fn content_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Encode into a [`RESPONSE_RECORD_LEN`] byte record.
    ///
    /// Status and content longer than their fields are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let mut record = vec![0u8; RESPONSE_RECORD_LEN];
        put_truncated(&mut record[..STATUS_LEN], self.status.as_bytes());
        put_truncated(&mut record[STATUS_LEN..], &self.content);
        record
    }

    /// Decode a response record.
    pub fn decode(record: &[u8]) -> Result<Self, CodecError> {
        check_len(record, RESPONSE_RECORD_LEN)?;
        let status = get_str(&record[..STATUS_LEN], "status")?;
        let content = until_nul(&record[STATUS_LEN..]).to_vec();
        Ok(Self { status, content })
    }
}

/// Encode a write payload into a [`PAYLOAD_LEN`] byte record.
pub fn encode_payload(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut record = vec![0u8; PAYLOAD_LEN];
    put_exact(&mut record, "payload", data)?;
    Ok(record)
}

/// Extract the payload bytes from a payload record. An all-NUL record yields
/// an empty payload.
pub fn decode_payload(record: &[u8]) -> Result<Vec<u8>, CodecError> {
    check_len(record, PAYLOAD_LEN)?;
    Ok(until_nul(record).to_vec())
}

/// Read one record of `len` bytes.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte.
pub fn read_record<R: Read + ?Sized>(
    reader: &mut R,
    len: usize,
) -> Result<Option<Vec<u8>>, CodecError> {
    let mut record = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut record[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(CodecError::Truncated {
                    expected: len,
                    received: filled,
                })
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CodecError::Io(err)),
        }
    }
    Ok(Some(record))
}

/// Read the next request, or `None` once the peer has closed the stream.
pub fn read_request<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Request>, CodecError> {
    read_record(reader, REQUEST_RECORD_LEN)?
        .map(|record| Request::decode(&record))
        .transpose()
}

/// Read a response; end of stream is an error because one was expected.
pub fn read_response<R: Read + ?Sized>(reader: &mut R) -> Result<Response, CodecError> {
    let record = read_record(reader, RESPONSE_RECORD_LEN)?.ok_or(CodecError::Closed)?;
    Response::decode(&record)
}

/// Read a write payload; end of stream is an error because one was expected.
pub fn read_payload<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let record = read_record(reader, PAYLOAD_LEN)?.ok_or(CodecError::Closed)?;
    decode_payload(&record)
}

/// Write an encoded response and flush it.
pub fn write_response<W: Write + ?Sized>(
    writer: &mut W,
    response: &Response,
) -> Result<(), CodecError> {
    writer.write_all(&response.encode())?;
    writer.flush()?;
    Ok(())
}

fn check_len(record: &[u8], expected: usize) -> Result<(), CodecError> {
    if record.len() != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: record.len(),
        });
    }
    Ok(())
}

fn put_exact(field: &mut [u8], name: &'static str, value: &[u8]) -> Result<(), CodecError> {
    // one byte stays reserved for the terminating NUL
    let max = field.len() - 1;
    if value.len() > max {
        return Err(CodecError::FieldTooLong {
            field: name,
            len: value.len(),
            max,
        });
    }
    if value.contains(&0) {
        return Err(CodecError::EmbeddedNul(name));
    }
    field[..value.len()].copy_from_slice(value);
    Ok(())
}

fn put_truncated(field: &mut [u8], value: &[u8]) {
    let value = until_nul(value);
    let len = value.len().min(field.len() - 1);
    field[..len].copy_from_slice(&value[..len]);
}

fn until_nul(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

fn get_str(field: &[u8], name: &'static str) -> Result<String, CodecError> {
    std::str::from_utf8(until_nul(field))
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUtf8(name))
}
