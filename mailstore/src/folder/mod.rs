//! Folder handles and their lifecycle
//!
//! A [`LocalFolder`] starts closed. Any operation that touches data opens it
//! first, creating the folder row if it does not exist yet. Opening with a
//! weaker mode than the current one is a no-op; a stronger mode reloads.
//!
//! Message operations live in `messages`, bulk maintenance in `maintenance`.

mod maintenance;
mod messages;

pub use messages::MessageFilter;

use rusqlite::types::Value;
use rusqlite::Row;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::error::{Result, StoreError};
use crate::gate::{Access, Session};
use crate::model::{FolderClass, FolderClasses, FolderRecord};
use crate::preferences::{self, pref_key, PreferenceEdit};
use crate::query::{folders, Column, Insert, Predicate, Select, Table, Update};
use crate::store::StoreInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone)]
enum FolderState {
    Closed,
    Open { mode: OpenMode, record: FolderRecord },
}

/// Classification and grouping settings persisted as preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderSettings {
    pub classes: FolderClasses,
    pub in_top_group: bool,
    pub integrate: bool,
}

impl FolderSettings {
    /// Settings a folder starts with before any preference applies
    pub fn defaults_for(name: &str, inbox_name: &str) -> Self {
        if name == inbox_name {
            Self {
                classes: FolderClasses::inbox(),
                in_top_group: true,
                integrate: false,
            }
        } else {
            Self {
                classes: FolderClasses::default(),
                in_top_group: false,
                integrate: false,
            }
        }
    }
}

pub struct LocalFolder {
    store: Arc<StoreInner>,
    name: String,
    state: Mutex<FolderState>,
    last_uid: Mutex<Option<u64>>,
}

fn parse_class(raw: Option<String>, fallback: FolderClass) -> FolderClass {
    match raw {
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(value = %value, "Unknown stored folder class");
            fallback
        }),
        None => fallback,
    }
}

pub(crate) fn row_to_folder(row: &Row<'_>) -> rusqlite::Result<FolderRecord> {
    Ok(FolderRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        visible_limit: row.get(2)?,
        last_checked: row.get(3)?,
        last_pushed: row.get(4)?,
        push_state: row.get(5)?,
        status: row.get(6)?,
        classes: FolderClasses {
            display: parse_class(row.get(7)?, FolderClass::NoClass),
            sync: parse_class(row.get(8)?, FolderClass::NoClass),
            push: parse_class(row.get(9)?, FolderClass::NoClass),
        },
        integrate: row.get(10)?,
        in_top_group: row.get(11)?,
    })
}

fn select_folder(session: &Session<'_>, name: &str) -> Result<Option<FolderRecord>> {
    session.select_row(
        &Select::from(Table::Folders)
            .columns(folders::ALL)
            .filter(Predicate::eq(folders::NAME, name.to_string())),
        row_to_folder,
    )
}

/// Settings for `name` with stored preferences applied over the defaults
pub(crate) fn load_settings(store: &StoreInner, name: &str, current: FolderSettings) -> FolderSettings {
    let prefs = &store.preferences;
    let key = |setting: &str| pref_key(&store.config.store_id, name, setting);
    let mut settings = current;

    let read_class = |setting: &str, current: FolderClass, none_means: FolderClass| {
        match prefs.get(&key(setting)) {
            None => current,
            Some(raw) if raw == "NONE" => none_means,
            Some(raw) => raw.parse::<FolderClass>().unwrap_or_else(|e| {
                error!(folder = name, setting, error = %e, "Unable to load folder class");
                current
            }),
        }
    };

    settings.classes.display = read_class(
        preferences::DISPLAY_MODE,
        current.classes.display,
        FolderClass::NoClass,
    );
    settings.classes.sync = read_class(
        preferences::SYNC_MODE,
        current.classes.sync,
        FolderClass::Inherited,
    );
    settings.classes.push = read_class(
        preferences::PUSH_MODE,
        current.classes.push,
        FolderClass::Inherited,
    );
    settings.in_top_group = prefs.get_bool(&key(preferences::IN_TOP_GROUP), current.in_top_group);
    settings.integrate = prefs.get_bool(&key(preferences::INTEGRATE), current.integrate);

    settings
}

/// Insert a folder row with its default settings and stored preferences
pub(crate) fn insert_folder_row(
    store: &StoreInner,
    session: &Session<'_>,
    name: &str,
    visible_limit: u32,
) -> Result<i64> {
    let defaults = FolderSettings::defaults_for(name, &store.config.inbox_folder_name);
    let settings = load_settings(store, name, defaults);

    let id = session.insert(
        &Insert::into(Table::Folders)
            .value(folders::NAME, name.to_string())
            .value(folders::VISIBLE_LIMIT, i64::from(visible_limit))
            .value(folders::DISPLAY_CLASS, settings.classes.display.as_str().to_string())
            .value(folders::SYNC_CLASS, settings.classes.sync.as_str().to_string())
            .value(folders::PUSH_CLASS, settings.classes.push.as_str().to_string())
            .value(folders::INTEGRATE, settings.integrate)
            .value(folders::TOP_GROUP, settings.in_top_group),
    )?;

    debug!(folder = name, id, "Created folder row");
    Ok(id)
}

impl LocalFolder {
    pub(crate) fn new(store: Arc<StoreInner>, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
            state: Mutex::new(FolderState::Closed),
            last_uid: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_inbox(&self) -> bool {
        self.name == self.store.config.inbox_folder_name
    }

    fn state(&self) -> Result<MutexGuard<'_, FolderState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Folder state poisoned: {}", e)))
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state().as_deref(), Ok(FolderState::Open { .. }))
    }

    pub fn mode(&self) -> Option<OpenMode> {
        match self.state().as_deref() {
            Ok(FolderState::Open { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state() {
            *state = FolderState::Closed;
        }
    }

    /// Open inside an existing unit of work, creating the row if needed.
    /// Returns the folder id.
    pub(crate) fn open_in(&self, session: &Session<'_>, mode: OpenMode) -> Result<i64> {
        let mut state = self.state()?;
        if let FolderState::Open {
            mode: current,
            record,
        } = &*state
        {
            if *current == mode || mode == OpenMode::ReadOnly {
                return Ok(record.id);
            }
        }
        *state = FolderState::Closed;

        let record = match select_folder(session, &self.name)? {
            Some(record) => record,
            None => {
                if session.access() == Access::ReadOnly {
                    return Err(StoreError::FolderNotFound(self.name.clone()));
                }
                warn!(folder = %self.name, "Creating missing folder on open");
                insert_folder_row(
                    &self.store,
                    session,
                    &self.name,
                    self.store.config.display_count,
                )?;
                select_folder(session, &self.name)?
                    .ok_or_else(|| StoreError::FolderNotFound(self.name.clone()))?
            }
        };

        let id = record.id;
        *state = FolderState::Open { mode, record };
        Ok(id)
    }

    /// Open the folder, creating it if it does not exist
    pub fn open(&self, mode: OpenMode) -> Result<()> {
        self.ensure_open(mode).map(|_| ())
    }

    fn cached_id(&self, mode: OpenMode) -> Option<i64> {
        match self.state().as_deref() {
            Ok(FolderState::Open {
                mode: current,
                record,
            }) if *current == mode || mode == OpenMode::ReadOnly => Some(record.id),
            _ => None,
        }
    }

    fn ensure_open(&self, mode: OpenMode) -> Result<i64> {
        if let Some(id) = self.cached_id(mode) {
            return Ok(id);
        }
        let result = self
            .store
            .gate
            .execute(Access::ReadWrite, |s| self.open_in(s, mode));
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Run `work` in a read-write unit with the folder open
    pub(crate) fn write<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>, i64) -> Result<T>,
    {
        let result = self.store.gate.execute(Access::ReadWrite, |s| {
            let id = self.open_in(s, OpenMode::ReadWrite)?;
            work(s, id)
        });
        if result.is_err() {
            // The folder row may have been created by the rolled back unit
            self.close();
        }
        result
    }

    /// Run `work` in a read-only unit with the folder open
    pub(crate) fn read<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>, i64) -> Result<T>,
    {
        let id = self.ensure_open(OpenMode::ReadWrite)?;
        self.store.gate.execute(Access::ReadOnly, |s| work(s, id))
    }

    /// Folder row id
    pub fn id(&self) -> Result<i64> {
        self.ensure_open(OpenMode::ReadWrite)
    }

    /// Cached snapshot of the folder row
    pub fn record(&self) -> Result<FolderRecord> {
        self.ensure_open(OpenMode::ReadWrite)?;
        match &*self.state()? {
            FolderState::Open { record, .. } => Ok(record.clone()),
            FolderState::Closed => Err(StoreError::FolderNotFound(self.name.clone())),
        }
    }

    fn update_cached(&self, apply: impl FnOnce(&mut FolderRecord)) {
        if let Ok(mut state) = self.state() {
            if let FolderState::Open { record, .. } = &mut *state {
                apply(record);
            }
        }
    }

    pub fn exists(&self) -> Result<bool> {
        self.store
            .gate
            .execute(Access::ReadOnly, |s| Ok(select_folder(s, &self.name)?.is_some()))
    }

    /// Create the folder row. Fails if it already exists.
    pub fn create(&self, visible_limit: Option<u32>) -> Result<()> {
        let limit = visible_limit.unwrap_or(self.store.config.display_count);
        self.store.gate.execute(Access::ReadWrite, |s| {
            if select_folder(s, &self.name)?.is_some() {
                return Err(StoreError::InvalidInput(format!(
                    "Folder {} already exists",
                    self.name
                )));
            }
            insert_folder_row(&self.store, s, &self.name, limit)?;
            Ok(())
        })
    }

    fn update_folder_column(&self, column: Column, value: Value) -> Result<()> {
        self.write(|s, id| {
            s.update(
                &Update::table(Table::Folders)
                    .set(column, value)
                    .filter(Predicate::eq(folders::ID, id)),
            )?;
            Ok(())
        })
    }

    pub fn visible_limit(&self) -> Result<u32> {
        Ok(self.record()?.visible_limit)
    }

    pub fn set_visible_limit(&self, limit: u32) -> Result<()> {
        self.update_folder_column(folders::VISIBLE_LIMIT, Value::Integer(i64::from(limit)))?;
        self.update_cached(|r| r.visible_limit = limit);
        Ok(())
    }

    /// Epoch milliseconds of the last successful check
    pub fn last_checked(&self) -> Result<i64> {
        Ok(self.record()?.last_checked)
    }

    pub fn set_last_checked(&self, millis: i64) -> Result<()> {
        self.update_folder_column(folders::LAST_UPDATED, Value::Integer(millis))?;
        self.update_cached(|r| r.last_checked = millis);
        Ok(())
    }

    pub fn last_pushed(&self) -> Result<i64> {
        Ok(self.record()?.last_pushed)
    }

    pub fn set_last_pushed(&self, millis: i64) -> Result<()> {
        self.update_folder_column(folders::LAST_PUSHED, Value::Integer(millis))?;
        self.update_cached(|r| r.last_pushed = millis);
        Ok(())
    }

    pub fn push_state(&self) -> Result<Option<String>> {
        Ok(self.record()?.push_state)
    }

    pub fn set_push_state(&self, state: Option<String>) -> Result<()> {
        self.update_folder_column(folders::PUSH_STATE, state.clone().into())?;
        self.update_cached(|r| r.push_state = state);
        Ok(())
    }

    pub fn set_status(&self, status: Option<String>) -> Result<()> {
        self.update_folder_column(folders::STATUS, status.clone().into())?;
        self.update_cached(|r| r.status = status);
        Ok(())
    }

    pub fn classes(&self) -> Result<FolderClasses> {
        Ok(self.record()?.classes)
    }

    pub fn display_class(&self) -> Result<FolderClass> {
        Ok(self.classes()?.effective_display())
    }

    /// Effective sync class; inherits from display
    pub fn sync_class(&self) -> Result<FolderClass> {
        Ok(self.classes()?.effective_sync())
    }

    /// Effective push class; inherits from sync
    pub fn push_class(&self) -> Result<FolderClass> {
        Ok(self.classes()?.effective_push())
    }

    pub fn set_display_class(&self, class: FolderClass) -> Result<()> {
        self.update_folder_column(folders::DISPLAY_CLASS, Value::Text(class.as_str().into()))?;
        self.update_cached(|r| r.classes.display = class);
        Ok(())
    }

    pub fn set_sync_class(&self, class: FolderClass) -> Result<()> {
        self.update_folder_column(folders::SYNC_CLASS, Value::Text(class.as_str().into()))?;
        self.update_cached(|r| r.classes.sync = class);
        Ok(())
    }

    pub fn set_push_class(&self, class: FolderClass) -> Result<()> {
        self.update_folder_column(folders::PUSH_CLASS, Value::Text(class.as_str().into()))?;
        self.update_cached(|r| r.classes.push = class);
        Ok(())
    }

    pub fn is_integrate(&self) -> Result<bool> {
        Ok(self.record()?.integrate)
    }

    pub fn set_integrate(&self, integrate: bool) -> Result<()> {
        self.update_folder_column(folders::INTEGRATE, Value::Integer(i64::from(integrate)))?;
        self.update_cached(|r| r.integrate = integrate);
        Ok(())
    }

    pub fn is_in_top_group(&self) -> Result<bool> {
        Ok(self.record()?.in_top_group)
    }

    pub fn set_in_top_group(&self, in_top_group: bool) -> Result<()> {
        self.update_folder_column(folders::TOP_GROUP, Value::Integer(i64::from(in_top_group)))?;
        self.update_cached(|r| r.in_top_group = in_top_group);
        Ok(())
    }

    fn pref_key(&self, setting: &str) -> String {
        pref_key(&self.store.config.store_id, &self.name, setting)
    }

    /// Persist classification and grouping. Default values are removed rather
    /// than stored, except for the inbox.
    pub fn save_preferences(&self) -> Result<()> {
        let record = self.record()?;
        let inbox = self.is_inbox();
        let mut edit = PreferenceEdit::default();

        let classes = [
            (preferences::DISPLAY_MODE, record.classes.display, FolderClass::NoClass),
            (preferences::SYNC_MODE, record.classes.sync, FolderClass::Inherited),
            (preferences::PUSH_MODE, record.classes.push, FolderClass::SecondClass),
        ];
        for (setting, value, default) in classes {
            if value == default && !inbox {
                edit.remove(self.pref_key(setting));
            } else {
                edit.put(self.pref_key(setting), value.as_str());
            }
        }
        edit.put(
            self.pref_key(preferences::IN_TOP_GROUP),
            record.in_top_group.to_string(),
        );
        edit.put(
            self.pref_key(preferences::INTEGRATE),
            record.integrate.to_string(),
        );

        self.store.preferences.commit(edit)
    }

    /// Reload classification and grouping from preferences into the folder
    pub fn refresh_preferences(&self) -> Result<FolderSettings> {
        let record = self.record()?;
        let current = FolderSettings {
            classes: record.classes,
            in_top_group: record.in_top_group,
            integrate: record.integrate,
        };
        let settings = load_settings(&self.store, &self.name, current);

        self.write(|s, id| {
            s.update(
                &Update::table(Table::Folders)
                    .set(folders::DISPLAY_CLASS, settings.classes.display.as_str().to_string())
                    .set(folders::SYNC_CLASS, settings.classes.sync.as_str().to_string())
                    .set(folders::PUSH_CLASS, settings.classes.push.as_str().to_string())
                    .set(folders::TOP_GROUP, settings.in_top_group)
                    .set(folders::INTEGRATE, settings.integrate)
                    .filter(Predicate::eq(folders::ID, id)),
            )?;
            Ok(())
        })?;
        self.update_cached(|r| {
            r.classes = settings.classes;
            r.in_top_group = settings.in_top_group;
            r.integrate = settings.integrate;
        });

        Ok(settings)
    }

    pub fn delete_preferences(&self) -> Result<()> {
        let mut edit = PreferenceEdit::default();
        for setting in preferences::ALL_SETTINGS {
            edit.remove(self.pref_key(setting));
        }
        self.store.preferences.commit(edit)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::FolderClass;
    use crate::store::LocalStore;

    use super::*;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = LocalStore::in_memory(dir.path()).expect("Failed to open store");
        (dir, store)
    }

    #[test]
    fn test_open_creates_missing_folder() {
        let (_dir, store) = store();
        let folder = store.folder("Archive");

        assert!(!folder.exists().expect("exists should succeed"));
        assert!(!folder.is_open());

        folder.open(OpenMode::ReadWrite).expect("Open should succeed");
        assert!(folder.is_open());
        assert!(folder.exists().expect("exists should succeed"));
        assert_eq!(folder.visible_limit().expect("limit"), 25);
    }

    #[test]
    fn test_reopen_modes() {
        let (_dir, store) = store();
        let folder = store.folder("INBOX");

        folder.open(OpenMode::ReadOnly).expect("Open should succeed");
        assert_eq!(folder.mode(), Some(OpenMode::ReadOnly));

        folder.open(OpenMode::ReadWrite).expect("Reopen should succeed");
        assert_eq!(folder.mode(), Some(OpenMode::ReadWrite));

        // A weaker mode keeps the current one
        folder.open(OpenMode::ReadOnly).expect("Reopen should succeed");
        assert_eq!(folder.mode(), Some(OpenMode::ReadWrite));

        folder.close();
        assert!(!folder.is_open());
    }

    #[test]
    fn test_create_twice_fails() {
        let (_dir, store) = store();
        let folder = store.folder("Drafts");
        folder.create(Some(10)).expect("Create should succeed");
        assert!(folder.create(None).is_err());
    }

    #[test]
    fn test_inbox_defaults() {
        let (_dir, store) = store();
        let inbox = store.folder("INBOX");

        assert_eq!(inbox.sync_class().expect("sync class"), FolderClass::FirstClass);
        assert_eq!(inbox.push_class().expect("push class"), FolderClass::FirstClass);
        assert!(inbox.is_in_top_group().expect("top group"));

        let other = store.folder("Lists");
        assert_eq!(other.sync_class().expect("sync class"), FolderClass::NoClass);
        assert_eq!(other.push_class().expect("push class"), FolderClass::SecondClass);
    }

    #[test]
    fn test_metadata_setters_persist() {
        let (_dir, store) = store();
        let folder = store.folder("INBOX");
        folder.set_visible_limit(100).expect("set limit");
        folder.set_last_checked(1_000).expect("set last checked");
        folder
            .set_push_state(Some("uidNext=42".into()))
            .expect("set push state");

        let again = store.folder("INBOX");
        assert_eq!(again.visible_limit().expect("limit"), 100);
        assert_eq!(again.last_checked().expect("last checked"), 1_000);
        assert_eq!(
            again.push_state().expect("push state").as_deref(),
            Some("uidNext=42")
        );
    }

    #[test]
    fn test_preferences_skip_defaults_except_inbox() {
        let (_dir, store) = store();
        let folder = store.folder("Lists");
        folder.save_preferences().expect("save");

        let prefs = &folder.store.preferences;
        assert!(prefs.get("local.Lists.displayMode").is_none());
        assert_eq!(prefs.get("local.Lists.inTopGroup").as_deref(), Some("false"));

        let inbox = store.folder("INBOX");
        inbox.save_preferences().expect("save");
        assert_eq!(
            prefs.get("local.INBOX.displayMode").as_deref(),
            Some("NO_CLASS")
        );
        assert_eq!(
            prefs.get("local.INBOX.syncMode").as_deref(),
            Some("FIRST_CLASS")
        );
    }

    #[test]
    fn test_refresh_maps_none() {
        let (_dir, store) = store();
        let folder = store.folder("Lists");
        folder.set_sync_class(FolderClass::FirstClass).expect("set sync");

        let mut edit = PreferenceEdit::default();
        edit.put("local.Lists.syncMode".to_string(), "NONE");
        edit.put("local.Lists.displayMode".to_string(), "FIRST_CLASS");
        folder.store.preferences.commit(edit).expect("commit");

        let settings = folder.refresh_preferences().expect("refresh");
        assert_eq!(settings.classes.sync, FolderClass::Inherited);
        assert_eq!(folder.sync_class().expect("sync"), FolderClass::FirstClass);
        assert_eq!(folder.display_class().expect("display"), FolderClass::FirstClass);

        folder.delete_preferences().expect("delete");
        assert!(folder.store.preferences.get("local.Lists.displayMode").is_none());
    }
}
