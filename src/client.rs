// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Blocking protocol client used by integration tests and scripted tooling.
// Author: Lukas Bower

//! Programmatic capfs client.
//!
//! This speaks the record protocol only; the interactive terminal client is a
//! separate program.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use capfs_wire::{encode_payload, read_response, Request, Response, User};

use crate::engine::STATUS_READY;
use crate::store::WriteMode;

/// Default socket timeout applied by [`FileClient::connect`].
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One connection acting as one user.
#[derive(Debug)]
pub struct FileClient {
    stream: TcpStream,
    user: User,
}

/// First phase of a write as seen by the client.
#[derive(Debug)]
pub enum WriteStart<'a> {
    /// The server holds the file and is waiting for the payload.
    Ready(PendingWrite<'a>),
    /// The server refused the write.
    Rejected(Response),
}

/// A write the server has accepted and is waiting to receive.
#[derive(Debug)]
pub struct PendingWrite<'a> {
    client: &'a mut FileClient,
    preview: Vec<u8>,
}

impl PendingWrite<'_> {
    /// File content at the time the server claimed it.
    pub fn preview(&self) -> &[u8] {
        &self.preview
    }

    /// Send the payload and wait for the final status.
    pub fn send(self, data: &[u8]) -> Result<Response> {
        let record = encode_payload(data).context("payload does not fit the record")?;
        self.client.send_raw(&record)?;
        self.client.receive()
    }
}

impl FileClient {
    /// Connect to `addr` and act as `user`.
    pub fn connect(addr: impl ToSocketAddrs, user: User) -> Result<Self> {
        let stream = TcpStream::connect(addr).context("failed to connect to capfs server")?;
        stream
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .context("failed to configure read timeout")?;
        stream
            .set_write_timeout(Some(DEFAULT_TIMEOUT))
            .context("failed to configure write timeout")?;
        Ok(Self { stream, user })
    }

    /// Identity sent with subsequent requests.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Switch identity; the server trusts whatever is presented.
    pub fn set_user(&mut self, user: User) {
        self.user = user;
    }

    fn send_raw(&mut self, record: &[u8]) -> Result<()> {
        self.stream
            .write_all(record)
            .context("failed to write to capfs server")?;
        self.stream.flush().context("failed to flush capfs stream")
    }

    /// Wait for the next response without sending anything.
    pub fn receive(&mut self) -> Result<Response> {
        read_response(&mut self.stream).map_err(|err| anyhow!("no response from server: {err}"))
    }

    /// Send a raw command line and wait for its response.
    pub fn request(&mut self, command: &str) -> Result<Response> {
        let record = Request::new(self.user.clone(), command)
            .encode()
            .context("request does not fit the record")?;
        self.send_raw(&record)?;
        self.receive()
    }

    /// `create <filename> <permissions>`
    pub fn create(&mut self, filename: &str, permissions: &str) -> Result<Response> {
        self.request(&format!("create {filename} {permissions}"))
    }

    /// `read <filename>`
    pub fn read(&mut self, filename: &str) -> Result<Response> {
        self.request(&format!("read {filename}"))
    }

    /// `mode <filename> <permissions>`
    pub fn change_mode(&mut self, filename: &str, permissions: &str) -> Result<Response> {
        self.request(&format!("mode {filename} {permissions}"))
    }

    /// Start a write and stop after the server's first response.
    pub fn begin_write(&mut self, filename: &str, mode: WriteMode) -> Result<WriteStart<'_>> {
        let response = self.request(&format!("write {filename} {}", mode.as_str()))?;
        if response.status != STATUS_READY {
            return Ok(WriteStart::Rejected(response));
        }
        Ok(WriteStart::Ready(PendingWrite {
            client: self,
            preview: response.content,
        }))
    }

    /// Complete write: returns the final response, or the rejection.
    pub fn write(&mut self, filename: &str, mode: WriteMode, data: &[u8]) -> Result<Response> {
        match self.begin_write(filename, mode)? {
            WriteStart::Ready(pending) => pending.send(data),
            WriteStart::Rejected(response) => Ok(response),
        }
    }

    /// Ask the server to close the connection.
    pub fn exit(mut self) -> Result<()> {
        let record = Request::new(self.user.clone(), "exit")
            .encode()
            .context("request does not fit the record")?;
        self.send_raw(&record)
    }
}
