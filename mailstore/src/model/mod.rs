//! Row snapshots and value types shared across the store

mod flags;
mod folder_class;
mod records;

pub use flags::{Flag, FlagSet};
pub use folder_class::{FolderClass, FolderClasses};
pub use records::{
    Address, AttachmentRecord, FolderRecord, HeaderField, LocalMessage, StoredBody, ThreadInfo,
    ThreadNode,
};

pub(crate) use records::{from_millis, to_millis};
