//! Mailstore - local SQLite cache for a mail client
//!
//! Keeps folders, messages, attachments and headers of synchronized mail
//! accounts, and links messages into conversations as they arrive.
//!
//! ## Module Organization
//!
//! - `schema`: table layout and migrations
//! - `query`: typed statement builder, every value bound as a parameter
//! - `gate`: units of work over the connection pool
//! - `threading`: conversation linkage with placeholder anchors
//! - `folder`: folder lifecycle and message operations
//! - `store`: the store handle tying the pieces together
//! - `mime`, `attachments`, `preferences`: pluggable capabilities
//! - `config`, `logging`, `error`: ambient setup

pub mod attachments;
pub mod config;
pub mod error;
pub mod folder;
pub mod gate;
pub mod logging;
pub mod mime;
pub mod model;
pub mod preferences;
pub mod query;
pub mod schema;
pub mod store;
pub mod threading;

pub use attachments::{AttachmentStore, DirectoryAttachmentStore, TempBlob};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use folder::{FolderSettings, LocalFolder, MessageFilter, OpenMode};
pub use gate::{Access, Gate, GateStatsSnapshot, Session};
pub use mime::{
    AttachmentContent, AttachmentPart, Decomposed, MailparseDecomposer, MessageBody,
    MessageDecomposer, WireMessage,
};
pub use model::{
    Address, AttachmentRecord, Flag, FlagSet, FolderClass, FolderClasses, FolderRecord,
    HeaderField, LocalMessage, StoredBody, ThreadNode,
};
pub use preferences::{FolderPreferences, MemoryPreferences, PreferenceEdit, TomlFilePreferences};
pub use store::{LocalStore, LocalStoreBuilder};
