// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Route fixed-size requests from one connection into the file engine.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Per-connection request loop.
//!
//! A handler reads one request record at a time, dispatches it, and writes
//! one response record back, until the peer closes the stream or sends
//! `exit`. The only time it reads anything other than a request is during a
//! `write`, when the engine asks it for the payload record through
//! [`WriteExchange`]. If that exchange fails at the transport level the
//! record boundaries can no longer be trusted, so the handler answers the
//! failed write and closes the connection.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use capfs_wire::{read_payload, read_request, write_response, CodecError, Request, Response};
use log::{debug, info, warn};

use crate::command::Command;
use crate::engine::{
    FileEngine, WriteExchange, STATUS_CREATED, STATUS_MODE_CHANGED, STATUS_READ, STATUS_READY,
};
use crate::FileServerError;

/// Status of the informational reply to a blank command.
pub const STATUS_INFO: &str = "INFO";
/// Content of the informational reply to a blank command.
pub const NO_COMMAND: &str = "No command received.";

/// Byte stream a handler can serve.
pub trait Transport: Read + Write {
    /// Bound the wait for the next read; `None` waits forever.
    fn set_payload_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_payload_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

/// Where a connection is in the request/payload protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the next request record.
    Idle,
    /// Ready response sent; waiting for the payload record.
    AwaitingWritePayload,
    /// The payload exchange broke mid-stream; the connection must close.
    Desynchronized,
}

/// Serves one client connection.
pub struct ConnectionHandler<S> {
    stream: S,
    peer: String,
    engine: Arc<FileEngine>,
    payload_timeout: Option<Duration>,
    state: ConnectionState,
}

impl<S: Transport> ConnectionHandler<S> {
    /// Handler for `stream`, labelled `peer` in logs.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        engine: Arc<FileEngine>,
        payload_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            engine,
            payload_timeout,
            state: ConnectionState::Idle,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Serve requests until the peer closes the stream or sends `exit`.
    pub fn run(&mut self) -> Result<(), CodecError> {
        info!("{}: connected", self.peer);
        loop {
            let response = match read_request(&mut self.stream) {
                Ok(Some(request)) => match self.dispatch(&request) {
                    Some(response) => response,
                    None => break,
                },
                Ok(None) => break,
                Err(CodecError::InvalidUtf8(field)) => Response::status(
                    FileServerError::protocol(format!("invalid utf8 in {field}")).to_string(),
                ),
                Err(err) => {
                    warn!("{}: dropping connection: {err}", self.peer);
                    return Err(err);
                }
            };
            if let Err(err) = write_response(&mut self.stream, &response) {
                warn!("{}: response not delivered: {err}", self.peer);
                return Err(err);
            }
            if self.state == ConnectionState::Desynchronized {
                warn!("{}: closing after failed payload exchange", self.peer);
                break;
            }
        }
        info!("{}: disconnected", self.peer);
        Ok(())
    }

    /// Handle one request; `None` means the connection should close.
    pub fn dispatch(&mut self, request: &Request) -> Option<Response> {
        let user = &request.user;
        debug!(
            "{}: {}/{} -> {:?}",
            self.peer, user.name, user.group, request.command
        );
        let command = match Command::parse(&request.command) {
            Ok(command) => command,
            Err(err) => return Some(Response::status(err.to_string())),
        };
        let engine = self.engine.clone();
        let result = match command {
            Command::Empty => return Some(Response::new(STATUS_INFO, NO_COMMAND)),
            Command::Exit => return None,
            Command::Create {
                filename,
                permissions,
            } => engine
                .create(user, &filename, &permissions)
                .map(|_| Response::status(STATUS_CREATED)),
            Command::Read { filename } => engine
                .read(user, &filename)
                .map(|content| Response::new(STATUS_READ, content)),
            Command::Write { filename, mode } => engine
                .write(user, &filename, mode, self)
                .map(|outcome| Response::status(outcome.status())),
            Command::Mode {
                filename,
                permissions,
            } => engine
                .change_mode(user, &filename, &permissions)
                .map(|_| Response::status(STATUS_MODE_CHANGED)),
        };
        // every engine exit path returns here, so the payload phase is over
        if self.state == ConnectionState::AwaitingWritePayload {
            self.state = ConnectionState::Idle;
        }
        Some(result.unwrap_or_else(|err| Response::status(err.to_string())))
    }
}

impl<S: Transport> WriteExchange for ConnectionHandler<S> {
    fn send_ready(&mut self, preview: &[u8]) -> Result<(), CodecError> {
        if let Err(err) = write_response(&mut self.stream, &Response::new(STATUS_READY, preview)) {
            self.state = ConnectionState::Desynchronized;
            return Err(err);
        }
        self.state = ConnectionState::AwaitingWritePayload;
        Ok(())
    }

    fn receive_payload(&mut self) -> Result<Vec<u8>, CodecError> {
        if let Err(err) = self.stream.set_payload_timeout(self.payload_timeout) {
            self.state = ConnectionState::Desynchronized;
            return Err(err.into());
        }
        let payload = read_payload(&mut self.stream);
        if let Err(err) = self.stream.set_payload_timeout(None) {
            warn!("{}: could not clear payload timeout: {err}", self.peer);
        }
        // a partial or late payload would be read as requests
        self.state = match &payload {
            Ok(_) => ConnectionState::Idle,
            Err(_) => ConnectionState::Desynchronized,
        };
        payload
    }
}
