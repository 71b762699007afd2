//! Attachment payload storage
//!
//! Payloads are written to a temporary blob first and moved into place under
//! the attachment's row id once that id exists. The store hands back an
//! opaque locator which is kept in `attachments.content_uri`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// A payload being written before its attachment id is known
pub struct TempBlob {
    file: NamedTempFile,
    written: u64,
}

impl TempBlob {
    pub fn new(file: NamedTempFile) -> Self {
        Self { file, written: 0 }
    }

    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn into_file(self) -> NamedTempFile {
        self.file
    }
}

impl Write for TempBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Byte storage for attachment payloads, keyed by attachment id
pub trait AttachmentStore: Send + Sync {
    fn allocate_temp(&self) -> Result<TempBlob>;

    /// Move a temporary blob into place for `attachment_id`; returns its locator
    fn finalize(&self, temp: TempBlob, attachment_id: i64) -> Result<String>;

    fn read(&self, locator: &str) -> Result<Vec<u8>>;

    /// Remove a payload. Missing payloads are not an error.
    fn delete(&self, locator: &str) -> Result<()>;
}

/// Stores each payload as a file named after its attachment id
#[derive(Debug, Clone)]
pub struct DirectoryAttachmentStore {
    root: PathBuf,
}

impl DirectoryAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            StoreError::Io(format!(
                "Failed to create attachment dir {:?}: {}",
                root, e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, attachment_id: i64) -> PathBuf {
        self.root.join(attachment_id.to_string())
    }

    /// Locators are paths inside the root; anything else is refused
    fn resolve(&self, locator: &str) -> Result<PathBuf> {
        let path = PathBuf::from(locator);
        if path.parent() != Some(self.root.as_path()) {
            return Err(StoreError::InvalidInput(format!(
                "Locator outside attachment store: {}",
                locator
            )));
        }
        Ok(path)
    }
}

impl AttachmentStore for DirectoryAttachmentStore {
    fn allocate_temp(&self) -> Result<TempBlob> {
        let file = NamedTempFile::new_in(&self.root)?;
        Ok(TempBlob::new(file))
    }

    fn finalize(&self, temp: TempBlob, attachment_id: i64) -> Result<String> {
        let target = self.path_for(attachment_id);
        let mut file = temp.into_file();
        file.flush()?;
        file.persist(&target)
            .map_err(|e| StoreError::Io(format!("Failed to store attachment: {}", e)))?;

        debug!(attachment_id, path = ?target, "Stored attachment payload");
        Ok(target.to_string_lossy().into_owned())
    }

    fn read(&self, locator: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(locator)?)?)
    }

    fn delete(&self, locator: &str) -> Result<()> {
        let path = self.resolve(locator)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = ?path, "Attachment payload already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_then_finalize() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = DirectoryAttachmentStore::new(dir.path()).expect("Failed to create store");

        let mut blob = store.allocate_temp().expect("Failed to allocate");
        blob.write_all(b"hello").expect("Failed to write");
        assert_eq!(blob.len(), 5);
        let temp_path = blob.path().to_path_buf();

        let locator = store.finalize(blob, 42).expect("Failed to finalize");
        assert!(locator.ends_with("42"));
        assert!(!temp_path.exists());
        assert_eq!(store.read(&locator).expect("Failed to read"), b"hello");

        store.delete(&locator).expect("Failed to delete");
        store.delete(&locator).expect("Second delete should be a no-op");
    }

    #[test]
    fn test_rejects_foreign_locator() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = DirectoryAttachmentStore::new(dir.path()).expect("Failed to create store");

        assert!(store.delete("/etc/passwd").is_err());
    }
}
