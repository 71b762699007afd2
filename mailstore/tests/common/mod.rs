#![allow(dead_code)]

use std::collections::HashMap;

use mailstore::{Decomposed, LocalStore, MessageBody, StoreConfig, WireMessage};
use rusqlite::Connection;
use tempfile::TempDir;

/// File-backed store so tests can inspect the tables directly
pub fn file_store() -> (TempDir, LocalStore) {
    mailstore::logging::try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = StoreConfig {
        database_path: Some(dir.path().join("mail.db")),
        attachment_dir: dir.path().join("attachments"),
        ..StoreConfig::default()
    };
    let store = LocalStore::open(config).expect("Failed to open store");
    (dir, store)
}

/// Plain text message with threading headers
pub fn message(uid: &str, message_id: &str, references: &[&str], in_reply_to: Option<&str>) -> WireMessage {
    let mut msg = WireMessage::new(Some(uid.to_string()))
        .with_header("Message-ID", message_id)
        .with_header("Subject", format!("Message {}", uid))
        .with_header("From", "Alice <alice@example.com>")
        .with_body(MessageBody::Local(Decomposed {
            text: Some(format!("Body of {}", uid)),
            html: None,
            attachments: Vec::new(),
        }));
    if !references.is_empty() {
        msg = msg.with_header("References", references.join(" "));
    }
    if let Some(parent) = in_reply_to {
        msg = msg.with_header("In-Reply-To", parent);
    }
    msg
}

#[derive(Debug, Clone, Copy)]
pub struct NodeRow {
    pub id: i64,
    pub message_row: i64,
    pub root: Option<i64>,
    pub parent: Option<i64>,
}

pub fn thread_rows(dir: &TempDir) -> Vec<NodeRow> {
    let conn = Connection::open(dir.path().join("mail.db")).expect("Failed to open database");
    let mut stmt = conn
        .prepare("SELECT id, message_id, root, parent FROM threads ORDER BY id")
        .expect("Failed to prepare");
    let rows = stmt
        .query_map([], |row| {
            Ok(NodeRow {
                id: row.get(0)?,
                message_row: row.get(1)?,
                root: row.get(2)?,
                parent: row.get(3)?,
            })
        })
        .expect("Failed to query");
    rows.collect::<Result<Vec<_>, _>>().expect("Failed to read rows")
}

/// Follow parents from every node; each walk must end within the node count
/// at the node its `root` names
pub fn assert_acyclic(nodes: &[NodeRow]) {
    let by_id: HashMap<i64, NodeRow> = nodes.iter().map(|n| (n.id, *n)).collect();

    for node in nodes {
        let mut current = *node;
        let mut steps = 0;
        while let Some(parent) = current.parent {
            steps += 1;
            assert!(steps <= nodes.len(), "Parent walk from node {} does not terminate", node.id);
            current = *by_id
                .get(&parent)
                .unwrap_or_else(|| panic!("Node {} has dangling parent {}", current.id, parent));
        }
        assert!(current.root.is_none(), "Top node {} is not a root", current.id);
        assert_eq!(
            node.root.unwrap_or(node.id),
            current.id,
            "Node {} names a root its ancestry does not reach",
            node.id
        );
    }
}

/// Every ordering of `items`
pub fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first.clone());
            out.push(tail);
        }
    }
    out
}
