// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: End-to-end capfs sessions over TCP through the blocking client.
// Author: Lukas Bower

use std::fs;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use capfs::audit::AuditLog;
use capfs::client::FileClient;
use capfs::store::FileStore;
use capfs::{CapabilityTable, FileEngine, FileServer, Permissions, User, WriteMode};
use tempfile::{tempdir, TempDir};

struct Harness {
    dir: TempDir,
    addr: SocketAddr,
    engine: Arc<FileEngine>,
}

fn start(max_files: usize) -> Harness {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path().join("file")).unwrap();
    let audit = AuditLog::with_file(dir.path().join("audit.log")).unwrap();
    let engine = Arc::new(FileEngine::new(
        CapabilityTable::new(max_files),
        store,
        audit,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let server = FileServer::from_parts(listener, engine.clone(), Some(Duration::from_secs(5)));
    let (addr, _accept) = server.spawn().unwrap();
    Harness { dir, addr, engine }
}

fn alice() -> User {
    User::new("alice", "CSE")
}

#[test]
fn create_then_read_is_empty() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();

    let resp = client.create("notes.txt", "rw----").unwrap();
    assert_eq!(resp.status, "File created successfully");
    let resp = client.read("notes.txt").unwrap();
    assert_eq!(resp.status, "File read successful");
    assert!(resp.content.is_empty());

    let entry = h.engine.table().lookup("notes.txt").unwrap();
    assert_eq!(entry.owner, "alice");
    assert_eq!(entry.group, "CSE");
    assert_eq!(entry.size_bytes, 0);
    assert!(h.dir.path().join("file").join("notes.txt").exists());
}

#[test]
fn overwrite_then_append() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    client.create("log.txt", "rw----").unwrap();

    let resp = client.write("log.txt", WriteMode::Overwrite, b"hello").unwrap();
    assert_eq!(resp.status, "File overwritten");
    let resp = client.write("log.txt", WriteMode::Append, b" world").unwrap();
    assert_eq!(resp.status, "Content appended");

    let resp = client.read("log.txt").unwrap();
    assert_eq!(resp.content, b"hello world");
    assert_eq!(h.engine.table().lookup("log.txt").unwrap().size_bytes, 11);
    assert_eq!(
        fs::read(h.dir.path().join("file").join("log.txt")).unwrap(),
        b"hello world"
    );
}

#[test]
fn ready_response_previews_current_content() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    client.create("draft", "rw----").unwrap();
    client.write("draft", WriteMode::Overwrite, b"v1").unwrap();

    match client.begin_write("draft", WriteMode::Overwrite).unwrap() {
        capfs::client::WriteStart::Ready(pending) => {
            assert_eq!(pending.preview(), b"v1");
            assert_eq!(pending.send(b"v2").unwrap().status, "File overwritten");
        }
        capfs::client::WriteStart::Rejected(resp) => panic!("rejected: {}", resp.status),
    }
    assert_eq!(client.read("draft").unwrap().content, b"v2");
}

#[test]
fn duplicate_and_overflow_creates_are_refused() {
    let h = start(3);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    for name in ["a", "b", "c"] {
        assert_eq!(
            client.create(name, "rw----").unwrap().status,
            "File created successfully"
        );
    }
    assert_eq!(client.create("a", "rw----").unwrap().status, "File already exists");
    assert_eq!(client.create("d", "rw----").unwrap().status, "File limit reached");
    assert_eq!(h.engine.table().len(), 3);
}

#[test]
fn invalid_permissions_create_nothing() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    for bad in ["rwx---", "rw--", "rw-----", "RW----"] {
        let resp = client.create("bad.txt", bad).unwrap();
        assert_eq!(resp.status, "Invalid permissions format.", "{bad}");
    }
    assert!(h.engine.table().lookup("bad.txt").is_none());
    assert_eq!(client.read("bad.txt").unwrap().status, "File not found");
}

#[test]
fn group_and_other_permissions_are_enforced() {
    let h = start(10);
    let mut owner = FileClient::connect(h.addr, alice()).unwrap();
    owner.create("shared", "rwr---").unwrap();
    owner.write("shared", WriteMode::Overwrite, b"team only").unwrap();

    let mut peer = FileClient::connect(h.addr, User::new("bob", "CSE")).unwrap();
    assert_eq!(peer.read("shared").unwrap().content, b"team only");
    assert_eq!(
        peer.write("shared", WriteMode::Append, b"!").unwrap().status,
        "Permission denied"
    );

    let mut outsider = FileClient::connect(h.addr, User::new("carol", "EE")).unwrap();
    assert_eq!(outsider.read("shared").unwrap().status, "Permission denied");
}

#[test]
fn only_owner_changes_mode() {
    let h = start(10);
    let mut owner = FileClient::connect(h.addr, alice()).unwrap();
    owner.create("plan", "rw----").unwrap();

    let mut other = FileClient::connect(h.addr, User::new("dave", "CSE")).unwrap();
    assert_eq!(
        other.change_mode("plan", "rwrwrw").unwrap().status,
        "Permission denied"
    );
    let perms = h.engine.table().lookup("plan").unwrap().permissions;
    assert_eq!(perms, "rw----".parse::<Permissions>().unwrap());
    assert_eq!(other.read("plan").unwrap().status, "Permission denied");

    assert_eq!(
        owner.change_mode("plan", "rwr---").unwrap().status,
        "Permissions changed"
    );
    assert_eq!(other.read("plan").unwrap().status, "File read successful");
    assert_eq!(
        owner.change_mode("plan", "rwx---").unwrap().status,
        "Invalid permissions format."
    );
}

#[test]
fn identity_is_taken_per_request() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    client.create("mine", "rw----").unwrap();
    client.set_user(User::new("mallory", "OPS"));
    assert_eq!(client.read("mine").unwrap().status, "Permission denied");
    client.set_user(alice());
    assert_eq!(client.read("mine").unwrap().status, "File read successful");
}

#[test]
fn blank_and_unknown_commands_keep_connection_open() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();

    let resp = client.request("").unwrap();
    assert_eq!(resp.status, "INFO");
    assert_eq!(resp.content_str(), "No command received.");

    let resp = client.request("ls").unwrap();
    assert!(resp.status.starts_with("Invalid command"), "{}", resp.status);
    let resp = client.request("read").unwrap();
    assert!(resp.status.starts_with("Invalid command"), "{}", resp.status);

    assert_eq!(
        client.create("still-here", "rw----").unwrap().status,
        "File created successfully"
    );
}

#[test]
fn exit_closes_the_connection() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    client.create("kept", "rw----").unwrap();
    client.exit().unwrap();

    let mut again = FileClient::connect(h.addr, alice()).unwrap();
    assert_eq!(again.read("kept").unwrap().status, "File read successful");
}

#[test]
fn audit_file_records_each_operation() {
    let h = start(10);
    let mut client = FileClient::connect(h.addr, alice()).unwrap();
    client.create("audited", "rw----").unwrap();
    client.read("audited").unwrap();
    client.read("nothing").unwrap();

    let text = fs::read_to_string(h.dir.path().join("audit.log")).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 3, "{text}");
    assert!(lines[0].contains("Action: create"));
    assert!(lines[0].contains("File: audited"));
    assert!(lines[1].contains("Action: read"));
    assert!(lines[2].contains("File: nothing"));
}
