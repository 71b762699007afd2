//! Query composition
//!
//! Statements are immutable expression trees over the store's tables. They
//! compile to SQL text plus a parameter list; every value travels as a bound
//! parameter and only identifiers known at compile time appear in the text.

mod predicate;
mod statement;

pub use predicate::Predicate;
pub use statement::{Delete, Insert, Order, Projection, Select, Update};

use rusqlite::types::Value;

use crate::error::Result;

/// Tables of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Folders,
    Messages,
    Threads,
    Attachments,
    Headers,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Folders => "folders",
            Table::Messages => "messages",
            Table::Threads => "threads",
            Table::Attachments => "attachments",
            Table::Headers => "headers",
        }
    }
}

/// A column of a known table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Column {
    pub table: Table,
    pub name: &'static str,
}

impl Column {
    pub const fn new(table: Table, name: &'static str) -> Self {
        Self { table, name }
    }

    /// `table.column`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table.name(), self.name)
    }
}

/// SQL text and its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Anything that compiles to a parameterized statement
pub trait Statement {
    fn compile(&self) -> Result<Compiled>;
}

pub mod folders {
    use super::{Column, Table};

    pub const ID: Column = Column::new(Table::Folders, "id");
    pub const NAME: Column = Column::new(Table::Folders, "name");
    pub const VISIBLE_LIMIT: Column = Column::new(Table::Folders, "visible_limit");
    pub const LAST_UPDATED: Column = Column::new(Table::Folders, "last_updated");
    pub const LAST_PUSHED: Column = Column::new(Table::Folders, "last_pushed");
    pub const PUSH_STATE: Column = Column::new(Table::Folders, "push_state");
    pub const STATUS: Column = Column::new(Table::Folders, "status");
    pub const DISPLAY_CLASS: Column = Column::new(Table::Folders, "display_class");
    pub const SYNC_CLASS: Column = Column::new(Table::Folders, "sync_class");
    pub const PUSH_CLASS: Column = Column::new(Table::Folders, "push_class");
    pub const INTEGRATE: Column = Column::new(Table::Folders, "integrate");
    pub const TOP_GROUP: Column = Column::new(Table::Folders, "top_group");

    pub const ALL: [Column; 12] = [
        ID,
        NAME,
        VISIBLE_LIMIT,
        LAST_UPDATED,
        LAST_PUSHED,
        PUSH_STATE,
        STATUS,
        DISPLAY_CLASS,
        SYNC_CLASS,
        PUSH_CLASS,
        INTEGRATE,
        TOP_GROUP,
    ];
}

pub mod messages {
    use super::{Column, Table};

    pub const ID: Column = Column::new(Table::Messages, "id");
    pub const FOLDER_ID: Column = Column::new(Table::Messages, "folder_id");
    pub const UID: Column = Column::new(Table::Messages, "uid");
    pub const MESSAGE_ID: Column = Column::new(Table::Messages, "message_id");
    pub const SUBJECT: Column = Column::new(Table::Messages, "subject");
    pub const DATE: Column = Column::new(Table::Messages, "date");
    pub const INTERNAL_DATE: Column = Column::new(Table::Messages, "internal_date");
    pub const FLAGS: Column = Column::new(Table::Messages, "flags");
    pub const SENDER_LIST: Column = Column::new(Table::Messages, "sender_list");
    pub const TO_LIST: Column = Column::new(Table::Messages, "to_list");
    pub const CC_LIST: Column = Column::new(Table::Messages, "cc_list");
    pub const BCC_LIST: Column = Column::new(Table::Messages, "bcc_list");
    pub const REPLY_TO_LIST: Column = Column::new(Table::Messages, "reply_to_list");
    pub const TEXT_CONTENT: Column = Column::new(Table::Messages, "text_content");
    pub const HTML_CONTENT: Column = Column::new(Table::Messages, "html_content");
    pub const PREVIEW: Column = Column::new(Table::Messages, "preview");
    pub const MIME_TYPE: Column = Column::new(Table::Messages, "mime_type");
    pub const ATTACHMENT_COUNT: Column = Column::new(Table::Messages, "attachment_count");
    pub const EMPTY: Column = Column::new(Table::Messages, "empty");
    pub const DELETED: Column = Column::new(Table::Messages, "deleted");
    pub const READ: Column = Column::new(Table::Messages, "read");
    pub const FLAGGED: Column = Column::new(Table::Messages, "flagged");
    pub const ANSWERED: Column = Column::new(Table::Messages, "answered");
    pub const FORWARDED: Column = Column::new(Table::Messages, "forwarded");

    /// Columns needed to build a message snapshot (no body content)
    pub const SUMMARY: [Column; 22] = [
        ID,
        FOLDER_ID,
        UID,
        MESSAGE_ID,
        SUBJECT,
        DATE,
        INTERNAL_DATE,
        FLAGS,
        SENDER_LIST,
        TO_LIST,
        CC_LIST,
        BCC_LIST,
        REPLY_TO_LIST,
        PREVIEW,
        MIME_TYPE,
        ATTACHMENT_COUNT,
        EMPTY,
        DELETED,
        READ,
        FLAGGED,
        ANSWERED,
        FORWARDED,
    ];
}

pub mod threads {
    use super::{Column, Table};

    pub const ID: Column = Column::new(Table::Threads, "id");
    pub const MESSAGE_ID: Column = Column::new(Table::Threads, "message_id");
    pub const ROOT: Column = Column::new(Table::Threads, "root");
    pub const PARENT: Column = Column::new(Table::Threads, "parent");

    pub const ALL: [Column; 4] = [ID, MESSAGE_ID, ROOT, PARENT];
}

pub mod attachments {
    use super::{Column, Table};

    pub const ID: Column = Column::new(Table::Attachments, "id");
    pub const MESSAGE_ID: Column = Column::new(Table::Attachments, "message_id");
    pub const STORE_DATA: Column = Column::new(Table::Attachments, "store_data");
    pub const CONTENT_URI: Column = Column::new(Table::Attachments, "content_uri");
    pub const SIZE: Column = Column::new(Table::Attachments, "size");
    pub const NAME: Column = Column::new(Table::Attachments, "name");
    pub const MIME_TYPE: Column = Column::new(Table::Attachments, "mime_type");
    pub const CONTENT_ID: Column = Column::new(Table::Attachments, "content_id");
    pub const CONTENT_DISPOSITION: Column = Column::new(Table::Attachments, "content_disposition");

    pub const ALL: [Column; 9] = [
        ID,
        MESSAGE_ID,
        STORE_DATA,
        CONTENT_URI,
        SIZE,
        NAME,
        MIME_TYPE,
        CONTENT_ID,
        CONTENT_DISPOSITION,
    ];
}

pub mod headers {
    use super::{Column, Table};

    pub const ID: Column = Column::new(Table::Headers, "id");
    pub const MESSAGE_ID: Column = Column::new(Table::Headers, "message_id");
    pub const NAME: Column = Column::new(Table::Headers, "name");
    pub const VALUE: Column = Column::new(Table::Headers, "value");
}
