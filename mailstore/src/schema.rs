//! Relational schema for the local store
//!
//! Tables: `folders`, `messages`, `threads`, `attachments`, `headers`.
//! Dates are stored as epoch milliseconds, address lists as JSON arrays.
//!
//! Constraints enforced here:
//! - folder names are unique
//! - a UID is unique within a folder among non-empty messages; placeholder
//!   rows (`empty = 1`) are exempt so a moved message can leave one behind
//! - removing a message row cascades to its thread node, attachments and headers

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

const SCHEMA: &str = r#"
    -- Folders
    CREATE TABLE IF NOT EXISTS folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        visible_limit INTEGER NOT NULL DEFAULT 25,
        last_updated INTEGER NOT NULL DEFAULT 0,
        last_pushed INTEGER NOT NULL DEFAULT 0,
        push_state TEXT,
        status TEXT,
        display_class TEXT NOT NULL DEFAULT 'NO_CLASS',
        sync_class TEXT NOT NULL DEFAULT 'INHERITED',
        push_class TEXT NOT NULL DEFAULT 'SECOND_CLASS',
        integrate INTEGER NOT NULL DEFAULT 0,
        top_group INTEGER NOT NULL DEFAULT 0
    );

    -- Messages, including empty placeholder rows used as thread anchors
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
        uid TEXT,
        message_id TEXT,
        subject TEXT,
        date INTEGER,
        internal_date INTEGER,
        flags TEXT,
        sender_list TEXT,
        to_list TEXT,
        cc_list TEXT,
        bcc_list TEXT,
        reply_to_list TEXT,
        text_content TEXT,
        html_content TEXT,
        preview TEXT,
        mime_type TEXT,
        attachment_count INTEGER NOT NULL DEFAULT 0,
        empty INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        read INTEGER NOT NULL DEFAULT 0,
        flagged INTEGER NOT NULL DEFAULT 0,
        answered INTEGER NOT NULL DEFAULT 0,
        forwarded INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_messages_folder ON messages(folder_id, date);
    CREATE INDEX IF NOT EXISTS idx_messages_message_id ON messages(message_id, folder_id);
    CREATE INDEX IF NOT EXISTS idx_messages_uid ON messages(folder_id, uid);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_folder_uid_unique
        ON messages(folder_id, uid) WHERE empty = 0 AND uid IS NOT NULL;

    -- Conversation linkage, one node per message row.
    -- root/parent reference other nodes and are kept consistent by the
    -- threading code rather than by foreign keys.
    CREATE TABLE IF NOT EXISTS threads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        root INTEGER,
        parent INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_threads_message ON threads(message_id);
    CREATE INDEX IF NOT EXISTS idx_threads_root ON threads(root);
    CREATE INDEX IF NOT EXISTS idx_threads_parent ON threads(parent);

    -- Attachments
    CREATE TABLE IF NOT EXISTS attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        store_data TEXT,
        content_uri TEXT,
        size INTEGER NOT NULL DEFAULT 0,
        name TEXT,
        mime_type TEXT,
        content_id TEXT,
        content_disposition TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

    -- Headers, insertion ordered by id
    CREATE TABLE IF NOT EXISTS headers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_headers_message ON headers(message_id);
"#;

/// Create all tables and indexes
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    debug!("Schema initialized");
    Ok(())
}
