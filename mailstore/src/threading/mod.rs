//! Conversation threading over the `threads` table
//!
//! Thread nodes form an arena addressed by row id. `root` and `parent` are
//! plain ids into the same table; a node whose `root` is NULL is the root of
//! its conversation. Messages referenced before they arrive get an empty
//! placeholder row plus a node, so replies can be linked immediately and the
//! real message takes over the placeholder later.
//!
//! All functions run inside a read-write unit of work.

pub mod references;

use rusqlite::types::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gate::Session;
use crate::model::{ThreadInfo, ThreadNode};
use crate::query::{messages, threads, Insert, Order, Predicate, Select, Table, Update};

pub use references::{ancestor_ids, extract_message_id, extract_message_ids};

/// Upper bound on parent hops when checking ancestry
const MAX_ANCESTRY_WALK: usize = 100_000;

/// A message row of a folder and its thread node, if it has one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchor {
    msg_id: i64,
    thread_id: Option<i64>,
    root: Option<i64>,
    parent: Option<i64>,
}

fn opt(id: Option<i64>) -> Value {
    id.map(Value::Integer).unwrap_or(Value::Null)
}

/// Oldest message row in the folder carrying `message_id`, joined to its node.
///
/// With `only_empty` set, only threading placeholders match. Rows left behind
/// by a move also have no content, but they keep their UID and must stay put.
fn find_anchor(
    session: &Session<'_>,
    folder_id: i64,
    message_id: &str,
    only_empty: bool,
) -> Result<Option<Anchor>> {
    let mut select = Select::from(Table::Messages)
        .left_join(Table::Threads, messages::ID, threads::MESSAGE_ID)
        .columns([messages::ID, threads::ID, threads::ROOT, threads::PARENT])
        .filter(Predicate::eq(messages::FOLDER_ID, folder_id))
        .filter(Predicate::eq(messages::MESSAGE_ID, message_id.to_string()));
    if only_empty {
        select = select
            .filter(Predicate::Empty)
            .filter(Predicate::IsNull(messages::UID));
    }
    let select = select.order_by(messages::ID, Order::Asc).limit(1);

    session.select_row(&select, |row| {
        Ok(Anchor {
            msg_id: row.get(0)?,
            thread_id: row.get(1)?,
            root: row.get(2)?,
            parent: row.get(3)?,
        })
    })
}

fn insert_node(
    session: &Session<'_>,
    msg_row: i64,
    root: Option<i64>,
    parent: Option<i64>,
) -> Result<i64> {
    session.insert(
        &Insert::into(Table::Threads)
            .value(threads::MESSAGE_ID, msg_row)
            .value(threads::ROOT, opt(root))
            .value(threads::PARENT, opt(parent)),
    )
}

fn parent_of(session: &Session<'_>, node: i64) -> Result<Option<i64>> {
    session.select_value(
        &Select::from(Table::Threads)
            .columns([threads::PARENT])
            .filter(Predicate::eq(threads::ID, node)),
    )
}

/// True when `node` is `start` or one of its ancestors
fn is_ancestor_or_self(session: &Session<'_>, node: i64, start: Option<i64>) -> Result<bool> {
    let mut current = start;
    let mut steps = 0;
    while let Some(id) = current {
        if id == node {
            return Ok(true);
        }
        steps += 1;
        if steps > MAX_ANCESTRY_WALK {
            warn!(node, "Ancestry walk exceeded bound, treating as cyclic");
            return Ok(true);
        }
        current = parent_of(session, id)?;
    }
    Ok(false)
}

/// Fold the conversation rooted at `old_root` into `new_root`, hanging
/// `old_root` under `parent`. Skipped if it would close a cycle.
fn merge_root(
    session: &Session<'_>,
    old_root: i64,
    new_root: i64,
    parent: Option<i64>,
) -> Result<bool> {
    if old_root == new_root || is_ancestor_or_self(session, old_root, parent)? {
        debug!(old_root, new_root, "Skipping merge that would create a cycle");
        return Ok(false);
    }

    session.update(
        &Update::table(Table::Threads)
            .set(threads::ROOT, new_root)
            .filter(Predicate::eq(threads::ROOT, old_root)),
    )?;
    session.update(
        &Update::table(Table::Threads)
            .set(threads::ROOT, new_root)
            .set(threads::PARENT, opt(parent))
            .filter(Predicate::eq(threads::ID, old_root)),
    )?;

    debug!(old_root, new_root, "Merged thread fragments");
    Ok(true)
}

/// Compute thread linkage for a message arriving in `folder_id`.
///
/// Creates placeholder rows and nodes for unknown ancestors and merges
/// fragments that turn out to belong together; the earlier root wins.
///
/// Ancestors are walked oldest first. A found ancestor whose conversation
/// root differs from the one collected so far is not simply adopted: its
/// whole fragment is folded into the running root and the fragment's old
/// root is hung under the previous ancestor. Otherwise a middle message
/// that names only its direct parent would leave two conversations that
/// never join, depending on arrival order.
///
/// The
/// returned `thread_id`/`msg_id` name a placeholder that the caller must
/// reuse for this message; when they are `None` the caller inserts a new
/// node with the returned `root` and `parent`.
pub(crate) fn resolve(
    session: &Session<'_>,
    folder_id: i64,
    message_id: Option<&str>,
    ancestors: &[String],
) -> Result<ThreadInfo> {
    let placeholder = match message_id {
        Some(id) => find_anchor(session, folder_id, id, true)?,
        None => None,
    };

    if ancestors.is_empty() {
        return Ok(ThreadInfo {
            thread_id: placeholder.and_then(|p| p.thread_id),
            msg_id: placeholder.map(|p| p.msg_id),
            message_id: message_id.map(str::to_string),
            root: placeholder.and_then(|p| p.root),
            parent: placeholder.and_then(|p| p.parent),
        });
    }

    let mut root: Option<i64> = None;
    let mut parent: Option<i64> = None;

    for reference in ancestors {
        let found = find_anchor(session, folder_id, reference, false)?;

        match found {
            Some(Anchor {
                thread_id: Some(node),
                root: found_root,
                ..
            }) => {
                let found_top = found_root.unwrap_or(node);
                match root {
                    Some(running) if running != found_top => {
                        // Independent fragment: fold it into ours
                        merge_root(session, found_top, running, parent)?;
                    }
                    Some(_) => {}
                    None => root = Some(found_top),
                }
                parent = Some(node);
            }
            other => {
                let msg_row = match other {
                    Some(anchor) => anchor.msg_id,
                    None => session.insert(
                        &Insert::into(Table::Messages)
                            .value(messages::MESSAGE_ID, reference.clone())
                            .value(messages::FOLDER_ID, folder_id)
                            .value(messages::EMPTY, 1i64),
                    )?,
                };
                let node = insert_node(session, msg_row, root, parent)?;
                debug!(message_id = %reference, node, "Created thread placeholder");
                if root.is_none() {
                    root = Some(node);
                }
                parent = Some(node);
            }
        }
    }

    // A placeholder that was a root of its own fragment now learns its
    // ancestors
    if let (Some(p), Some(running)) = (placeholder, root) {
        if let Some(node) = p.thread_id {
            if p.root.is_none() {
                merge_root(session, node, running, parent)?;
            }
        }
    }

    Ok(ThreadInfo {
        thread_id: placeholder.and_then(|p| p.thread_id),
        msg_id: placeholder.map(|p| p.msg_id),
        message_id: message_id.map(str::to_string),
        root,
        parent,
    })
}

/// Give `msg_row` its thread node: the placeholder's node when one was
/// found, otherwise a fresh node with the computed linkage.
pub(crate) fn attach(session: &Session<'_>, msg_row: i64, info: &ThreadInfo) -> Result<i64> {
    match info.thread_id {
        Some(node) => {
            session.update(
                &Update::table(Table::Threads)
                    .set(threads::MESSAGE_ID, msg_row)
                    .filter(Predicate::eq(threads::ID, node)),
            )?;
            Ok(node)
        }
        None => insert_node(session, msg_row, info.root, info.parent),
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadNode> {
    Ok(ThreadNode {
        id: row.get(0)?,
        message_row: row.get(1)?,
        root: row.get(2)?,
        parent: row.get(3)?,
    })
}

/// Thread node of a message row
pub(crate) fn node_for_message(session: &Session<'_>, msg_row: i64) -> Result<Option<ThreadNode>> {
    session.select_row(
        &Select::from(Table::Threads)
            .columns(threads::ALL)
            .filter(Predicate::eq(threads::MESSAGE_ID, msg_row))
            .order_by(threads::ID, Order::Asc)
            .limit(1),
        row_to_node,
    )
}

/// Every node of the conversation rooted at `root`, root first
pub(crate) fn conversation(session: &Session<'_>, root: i64) -> Result<Vec<ThreadNode>> {
    let mut nodes = session.select(
        &Select::from(Table::Threads)
            .columns(threads::ALL)
            .filter(Predicate::eq(threads::ID, root)),
        row_to_node,
    )?;
    nodes.extend(session.select(
        &Select::from(Table::Threads)
            .columns(threads::ALL)
            .filter(Predicate::eq(threads::ROOT, root))
            .order_by(threads::ID, Order::Asc),
        row_to_node,
    )?);
    Ok(nodes)
}

/// Unlink a node that is about to be removed.
///
/// Children move up to the removed node's parent. When the removed node is a
/// root, its oldest child becomes the new root of the conversation.
pub(crate) fn detach(session: &Session<'_>, node: &ThreadNode) -> Result<()> {
    let children: Vec<i64> = session.select(
        &Select::from(Table::Threads)
            .columns([threads::ID])
            .filter(Predicate::eq(threads::PARENT, node.id))
            .order_by(threads::ID, Order::Asc),
        |row| row.get(0),
    )?;

    if node.root.is_some() {
        if !children.is_empty() {
            session.update(
                &Update::table(Table::Threads)
                    .set(threads::PARENT, opt(node.parent))
                    .filter(Predicate::eq(threads::PARENT, node.id)),
            )?;
        }
        return Ok(());
    }

    let Some(&heir) = children.first() else {
        return Ok(());
    };

    session.update(
        &Update::table(Table::Threads)
            .set(threads::ROOT, Value::Null)
            .set(threads::PARENT, Value::Null)
            .filter(Predicate::eq(threads::ID, heir)),
    )?;
    session.update(
        &Update::table(Table::Threads)
            .set(threads::PARENT, heir)
            .filter(Predicate::eq(threads::PARENT, node.id)),
    )?;
    session.update(
        &Update::table(Table::Threads)
            .set(threads::ROOT, heir)
            .filter(Predicate::eq(threads::ROOT, node.id))
            .filter(Predicate::ne(threads::ID, heir)),
    )?;

    debug!(old_root = node.id, new_root = heir, "Promoted child to thread root");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{Access, Gate};
    use crate::query::folders;

    fn setup() -> (Gate, i64) {
        let gate = Gate::in_memory().expect("Failed to create gate");
        let folder = gate
            .execute(Access::ReadWrite, |s| {
                s.insert(&Insert::into(Table::Folders).value(folders::NAME, "INBOX".to_string()))
            })
            .expect("Failed to create folder");
        (gate, folder)
    }

    /// Store a message the way append does and return its node
    fn deliver(gate: &Gate, folder: i64, id: &str, refs: &[&str]) -> ThreadNode {
        let ancestors: Vec<String> = refs.iter().map(|s| s.to_string()).collect();
        gate.execute(Access::ReadWrite, |s| {
            let info = resolve(s, folder, Some(id), &ancestors)?;
            let row = match info.msg_id {
                Some(row) => {
                    s.update(
                        &Update::table(Table::Messages)
                            .set(messages::EMPTY, 0i64)
                            .filter(Predicate::eq(messages::ID, row)),
                    )?;
                    row
                }
                None => s.insert(
                    &Insert::into(Table::Messages)
                        .value(messages::FOLDER_ID, folder)
                        .value(messages::MESSAGE_ID, id.to_string())
                        .value(messages::EMPTY, 0i64),
                )?,
            };
            attach(s, row, &info)?;
            Ok(node_for_message(s, row)?.expect("node exists"))
        })
        .expect("Delivery should succeed")
    }

    fn reload(gate: &Gate, node: &ThreadNode) -> ThreadNode {
        gate.execute(Access::ReadOnly, |s| node_for_message(s, node.message_row))
            .expect("Lookup should succeed")
            .expect("Node should exist")
    }

    #[test]
    fn test_reply_chain() {
        let (gate, folder) = setup();
        let a = deliver(&gate, folder, "<1@x>", &[]);
        let b = deliver(&gate, folder, "<2@x>", &["<1@x>"]);
        let c = deliver(&gate, folder, "<3@x>", &["<1@x>", "<2@x>"]);

        assert!(a.is_root());
        assert_eq!(b.root, Some(a.id));
        assert_eq!(b.parent, Some(a.id));
        assert_eq!(c.root, Some(a.id));
        assert_eq!(c.parent, Some(b.id));
    }

    #[test]
    fn test_reply_before_original_reuses_placeholder() {
        let (gate, folder) = setup();
        let b = deliver(&gate, folder, "<2@x>", &["<1@x>"]);
        let a = deliver(&gate, folder, "<1@x>", &[]);

        assert_eq!(b.root, Some(a.id));
        assert!(a.is_root());

        let rows: i64 = gate
            .execute(Access::ReadOnly, |s| {
                s.select_value(
                    &Select::from(Table::Messages)
                        .project(crate::query::Projection::Count)
                        .filter(Predicate::eq(messages::FOLDER_ID, folder)),
                )
            })
            .expect("Count should succeed")
            .unwrap_or(0);
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_fragments_merge_into_earlier_root() {
        let (gate, folder) = setup();
        // Two replies whose shared ancestry is not known yet
        let d = deliver(&gate, folder, "<4@x>", &["<1@x>"]);
        let e = deliver(&gate, folder, "<5@x>", &["<2@x>"]);
        assert_ne!(d.root, e.root);

        // <2> turns out to be a reply to <1>
        let b = deliver(&gate, folder, "<2@x>", &["<1@x>"]);

        let d = reload(&gate, &d);
        let e = reload(&gate, &e);
        assert_eq!(d.root, b.root);
        assert_eq!(e.root, b.root);
        assert_eq!(e.parent, Some(b.id));
    }

    #[test]
    fn test_merge_via_reference_chain() {
        let (gate, folder) = setup();
        let x = deliver(&gate, folder, "<10@x>", &["<1@x>"]);
        let y = deliver(&gate, folder, "<11@x>", &["<2@x>"]);
        // A message naming both ancestors links the second root under the first
        let z = deliver(&gate, folder, "<12@x>", &["<1@x>", "<2@x>"]);

        let x = reload(&gate, &x);
        let y = reload(&gate, &y);
        assert_eq!(x.root, z.root);
        assert_eq!(y.root, z.root);
    }

    #[test]
    fn test_cyclic_references_do_not_loop() {
        let (gate, folder) = setup();
        let a = deliver(&gate, folder, "<1@x>", &["<2@x>"]);
        let b = deliver(&gate, folder, "<2@x>", &["<1@x>"]);

        let a = reload(&gate, &a);
        let b = reload(&gate, &b);
        let nodes = [a, b];
        for node in nodes.iter() {
            let cyclic = gate
                .execute(Access::ReadOnly, |s| {
                    is_ancestor_or_self(s, node.id, node.parent)
                })
                .expect("Walk should succeed");
            assert!(!cyclic, "node {} is its own ancestor", node.id);
        }
    }

    #[test]
    fn test_detach_middle_keeps_conversation() {
        let (gate, folder) = setup();
        let a = deliver(&gate, folder, "<1@x>", &[]);
        let b = deliver(&gate, folder, "<2@x>", &["<1@x>"]);
        let c = deliver(&gate, folder, "<3@x>", &["<1@x>", "<2@x>"]);

        gate.execute(Access::ReadWrite, |s| {
            detach(s, &b)?;
            s.delete(
                &crate::query::Delete::from(Table::Messages)
                    .filter(Predicate::eq(messages::ID, b.message_row)),
            )
        })
        .expect("Detach should succeed");

        let c = reload(&gate, &c);
        assert_eq!(c.root, Some(a.id));
        assert_eq!(c.parent, Some(a.id));
    }

    #[test]
    fn test_detach_root_promotes_child() {
        let (gate, folder) = setup();
        let a = deliver(&gate, folder, "<1@x>", &[]);
        let b = deliver(&gate, folder, "<2@x>", &["<1@x>"]);
        let c = deliver(&gate, folder, "<3@x>", &["<1@x>", "<2@x>"]);
        let d = deliver(&gate, folder, "<4@x>", &["<1@x>"]);

        gate.execute(Access::ReadWrite, |s| detach(s, &a))
            .expect("Detach should succeed");

        let b = reload(&gate, &b);
        let c = reload(&gate, &c);
        let d = reload(&gate, &d);
        assert!(b.is_root());
        assert_eq!(b.parent, None);
        assert_eq!(c.root, Some(b.id));
        assert_eq!(d.root, Some(b.id));
        assert_eq!(d.parent, Some(b.id));

        let members = gate
            .execute(Access::ReadOnly, |s| conversation(s, b.id))
            .expect("Conversation lookup should succeed");
        assert_eq!(members.len(), 3);
    }
}
