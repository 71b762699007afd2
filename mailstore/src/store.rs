use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::attachments::{AttachmentStore, DirectoryAttachmentStore};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::folder::{insert_folder_row, row_to_folder, LocalFolder};
use crate::gate::{Access, Gate, GateStatsSnapshot};
use crate::mime::{MailparseDecomposer, MessageDecomposer};
use crate::model::FolderRecord;
use crate::preferences::{FolderPreferences, MemoryPreferences, TomlFilePreferences};
use crate::query::{folders, Order, Select, Table};

/// State shared by a store and every folder handle it gives out
pub(crate) struct StoreInner {
    pub(crate) gate: Gate,
    pub(crate) config: StoreConfig,
    pub(crate) decomposer: Arc<dyn MessageDecomposer>,
    pub(crate) attachments: Arc<dyn AttachmentStore>,
    pub(crate) preferences: Arc<dyn FolderPreferences>,
    search_active: AtomicBool,
}

impl StoreInner {
    pub(crate) fn search_active(&self) -> bool {
        self.search_active.load(Ordering::SeqCst)
    }
}

/// Local mail store
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

/// Builder for a [`LocalStore`] with non-default capabilities
pub struct LocalStoreBuilder {
    config: StoreConfig,
    decomposer: Option<Arc<dyn MessageDecomposer>>,
    attachments: Option<Arc<dyn AttachmentStore>>,
    preferences: Option<Arc<dyn FolderPreferences>>,
}

impl LocalStoreBuilder {
    pub fn decomposer(mut self, decomposer: Arc<dyn MessageDecomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    pub fn attachment_store(mut self, store: Arc<dyn AttachmentStore>) -> Self {
        self.attachments = Some(store);
        self
    }

    pub fn preferences(mut self, preferences: Arc<dyn FolderPreferences>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn build(self) -> Result<LocalStore> {
        let config = self.config;
        config.validate()?;

        let gate = match &config.database_path {
            Some(path) => {
                info!("Opening local store at {:?}", path);
                Gate::open_file(path, config.pool_size)?
            }
            None => {
                info!("Opening in-memory local store");
                Gate::in_memory()?
            }
        };

        let attachments: Arc<dyn AttachmentStore> = match self.attachments {
            Some(store) => store,
            None => Arc::new(DirectoryAttachmentStore::new(&config.attachment_dir)?),
        };

        // Preferences live next to the database file unless supplied
        let preferences: Arc<dyn FolderPreferences> = match (self.preferences, &config.database_path) {
            (Some(prefs), _) => prefs,
            (None, Some(path)) => Arc::new(TomlFilePreferences::open(
                path.with_extension("prefs.toml"),
            )?),
            (None, None) => Arc::new(MemoryPreferences::new()),
        };

        let decomposer = self
            .decomposer
            .unwrap_or_else(|| Arc::new(MailparseDecomposer));

        Ok(LocalStore {
            inner: Arc::new(StoreInner {
                gate,
                config,
                decomposer,
                attachments,
                preferences,
                search_active: AtomicBool::new(false),
            }),
        })
    }
}

impl LocalStore {
    pub fn builder(config: StoreConfig) -> LocalStoreBuilder {
        LocalStoreBuilder {
            config,
            decomposer: None,
            attachments: None,
            preferences: None,
        }
    }

    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// In-memory database with attachment payloads under `attachment_dir`
    pub fn in_memory(attachment_dir: &Path) -> Result<Self> {
        let config = StoreConfig {
            database_path: None,
            attachment_dir: attachment_dir.to_path_buf(),
            ..StoreConfig::default()
        };
        Self::open(config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Handle for a folder. The folder row is created on first use.
    pub fn folder(&self, name: &str) -> LocalFolder {
        LocalFolder::new(Arc::clone(&self.inner), name)
    }

    /// Create folder rows in one unit of work
    pub fn create_folders(&self, names: &[&str], visible_limit: u32) -> Result<()> {
        self.inner.gate.execute(Access::ReadWrite, |s| {
            for name in names {
                insert_folder_row(&self.inner, s, name, visible_limit)?;
            }
            Ok(())
        })?;
        info!(count = names.len(), "Created folders");
        Ok(())
    }

    /// All folder rows, ordered by name
    pub fn folders(&self) -> Result<Vec<FolderRecord>> {
        self.inner.gate.execute(Access::ReadOnly, |s| {
            s.select(
                &Select::from(Table::Folders)
                    .columns(folders::ALL)
                    .order_by(folders::NAME, Order::Asc),
                row_to_folder,
            )
        })
    }

    /// While set, folders are not purged to their visible limit
    pub fn set_search_active(&self, active: bool) {
        self.inner.search_active.store(active, Ordering::SeqCst);
    }

    pub fn is_search_active(&self) -> bool {
        self.inner.search_active()
    }

    pub fn stats(&self) -> GateStatsSnapshot {
        self.inner.gate.stats()
    }
}
