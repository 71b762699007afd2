//! Per-folder preference persistence
//!
//! Keys have the form `<store id>.<folder name>.<setting>`. Values are
//! strings; booleans are stored as `true`/`false`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StoreError};

pub const DISPLAY_MODE: &str = "displayMode";
pub const SYNC_MODE: &str = "syncMode";
pub const PUSH_MODE: &str = "pushMode";
pub const IN_TOP_GROUP: &str = "inTopGroup";
pub const INTEGRATE: &str = "integrate";

pub const ALL_SETTINGS: [&str; 5] = [DISPLAY_MODE, SYNC_MODE, PUSH_MODE, IN_TOP_GROUP, INTEGRATE];

/// `<store id>.<folder name>.<setting>`
pub fn pref_key(store_id: &str, folder: &str, setting: &str) -> String {
    format!("{}.{}.{}", store_id, folder, setting)
}

/// A set of edits applied together
#[derive(Debug, Default, Clone)]
pub struct PreferenceEdit {
    changes: Vec<(String, Option<String>)>,
}

impl PreferenceEdit {
    pub fn put(&mut self, key: String, value: impl Into<String>) -> &mut Self {
        self.changes.push((key, Some(value.into())));
        self
    }

    pub fn remove(&mut self, key: String) -> &mut Self {
        self.changes.push((key, None));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Key/value preference backend
pub trait FolderPreferences: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn commit(&self, edit: PreferenceEdit) -> Result<()>;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        }
    }
}

fn apply(map: &mut BTreeMap<String, String>, edit: PreferenceEdit) {
    for (key, value) in edit.changes {
        match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FolderPreferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn commit(&self, edit: PreferenceEdit) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Preferences lock poisoned: {}", e)))?;
        apply(&mut values, edit);
        Ok(())
    }
}

/// Preferences kept in a flat TOML table, rewritten on every commit
#[derive(Debug)]
pub struct TomlFilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl TomlFilePreferences {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FolderPreferences for TomlFilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn commit(&self, edit: PreferenceEdit) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Preferences lock poisoned: {}", e)))?;
        apply(&mut values, edit);

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let content = toml::to_string(&*values)?;
        fs::write(&self.path, content)?;
        debug!(path = ?self.path, entries = values.len(), "Saved folder preferences");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_put_and_remove() {
        let prefs = MemoryPreferences::new();
        let key = pref_key("acct", "INBOX", DISPLAY_MODE);

        let mut edit = PreferenceEdit::default();
        edit.put(key.clone(), "FIRST_CLASS");
        prefs.commit(edit).expect("Commit should succeed");
        assert_eq!(prefs.get(&key).as_deref(), Some("FIRST_CLASS"));

        let mut edit = PreferenceEdit::default();
        edit.remove(key.clone());
        prefs.commit(edit).expect("Commit should succeed");
        assert!(prefs.is_empty());
    }

    #[test]
    fn test_toml_file_round_trip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("prefs.toml");
        let key = pref_key("acct", "Sent", IN_TOP_GROUP);

        {
            let prefs = TomlFilePreferences::open(&path).expect("Open should succeed");
            let mut edit = PreferenceEdit::default();
            edit.put(key.clone(), "true");
            prefs.commit(edit).expect("Commit should succeed");
        }

        let prefs = TomlFilePreferences::open(&path).expect("Reopen should succeed");
        assert!(prefs.get_bool(&key, false));
        assert!(!prefs.get_bool("acct.Other.inTopGroup", false));
    }
}
