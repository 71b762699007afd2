use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Folder classification used for display, sync and push decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderClass {
    NoClass,
    FirstClass,
    SecondClass,
    Inherited,
}

impl FolderClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderClass::NoClass => "NO_CLASS",
            FolderClass::FirstClass => "FIRST_CLASS",
            FolderClass::SecondClass => "SECOND_CLASS",
            FolderClass::Inherited => "INHERITED",
        }
    }

    /// Resolve a raw class against the already-resolved class of the level
    /// it inherits from. Never returns `Inherited`.
    pub fn resolve(raw: FolderClass, parent: FolderClass) -> FolderClass {
        match (raw, parent) {
            (FolderClass::Inherited, FolderClass::Inherited) => FolderClass::NoClass,
            (FolderClass::Inherited, parent) => parent,
            (raw, _) => raw,
        }
    }
}

impl fmt::Display for FolderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FolderClass {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO_CLASS" => Ok(FolderClass::NoClass),
            "FIRST_CLASS" => Ok(FolderClass::FirstClass),
            "SECOND_CLASS" => Ok(FolderClass::SecondClass),
            "INHERITED" => Ok(FolderClass::Inherited),
            other => Err(StoreError::InvalidInput(format!(
                "Unknown folder class: {}",
                other
            ))),
        }
    }
}

/// Raw display/sync/push classes of a folder, as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderClasses {
    pub display: FolderClass,
    pub sync: FolderClass,
    pub push: FolderClass,
}

impl Default for FolderClasses {
    fn default() -> Self {
        Self {
            display: FolderClass::NoClass,
            sync: FolderClass::Inherited,
            push: FolderClass::SecondClass,
        }
    }
}

impl FolderClasses {
    /// Classes an inbox starts with
    pub fn inbox() -> Self {
        Self {
            sync: FolderClass::FirstClass,
            push: FolderClass::FirstClass,
            ..Self::default()
        }
    }

    pub fn effective_display(&self) -> FolderClass {
        FolderClass::resolve(self.display, FolderClass::NoClass)
    }

    /// Sync inherits from display
    pub fn effective_sync(&self) -> FolderClass {
        FolderClass::resolve(self.sync, self.effective_display())
    }

    /// Push inherits from sync
    pub fn effective_push(&self) -> FolderClass {
        FolderClass::resolve(self.push, self.effective_sync())
    }
}
