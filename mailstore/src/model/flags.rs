use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Message flags known to the store.
///
/// The first five are protocol system flags that also live in dedicated
/// message columns; the `X*` variants are local bookkeeping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Deleted,
    Seen,
    Answered,
    Flagged,
    Forwarded,
    Draft,
    Recent,
    XDestroyed,
    XDownloadedFull,
    XDownloadedPartial,
    XRemoteCopyStarted,
    XSendFailed,
    XSendInProgress,
    XGotAllHeaders,
}

impl Flag {
    pub const ALL: [Flag; 14] = [
        Flag::Deleted,
        Flag::Seen,
        Flag::Answered,
        Flag::Flagged,
        Flag::Forwarded,
        Flag::Draft,
        Flag::Recent,
        Flag::XDestroyed,
        Flag::XDownloadedFull,
        Flag::XDownloadedPartial,
        Flag::XRemoteCopyStarted,
        Flag::XSendFailed,
        Flag::XSendInProgress,
        Flag::XGotAllHeaders,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Deleted => "DELETED",
            Flag::Seen => "SEEN",
            Flag::Answered => "ANSWERED",
            Flag::Flagged => "FLAGGED",
            Flag::Forwarded => "FORWARDED",
            Flag::Draft => "DRAFT",
            Flag::Recent => "RECENT",
            Flag::XDestroyed => "X_DESTROYED",
            Flag::XDownloadedFull => "X_DOWNLOADED_FULL",
            Flag::XDownloadedPartial => "X_DOWNLOADED_PARTIAL",
            Flag::XRemoteCopyStarted => "X_REMOTE_COPY_STARTED",
            Flag::XSendFailed => "X_SEND_FAILED",
            Flag::XSendInProgress => "X_SEND_IN_PROGRESS",
            Flag::XGotAllHeaders => "X_GOT_ALL_HEADERS",
        }
    }

    /// Message column holding this flag, if it has one
    pub fn column_name(&self) -> Option<&'static str> {
        match self {
            Flag::Deleted => Some("deleted"),
            Flag::Seen => Some("read"),
            Flag::Flagged => Some("flagged"),
            Flag::Answered => Some("answered"),
            Flag::Forwarded => Some("forwarded"),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Flag::ALL
            .iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| StoreError::InvalidInput(format!("Unknown flag: {}", s)))
    }
}

/// Ordered set of flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet(BTreeSet<Flag>);

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        if value {
            self.0.insert(flag);
        } else {
            self.0.remove(&flag);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-separated list of the flags without a dedicated column
    pub fn serialize_extra(&self) -> String {
        self.0
            .iter()
            .filter(|flag| flag.column_name().is_none())
            .map(|flag| flag.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a stored extra-flags string. Unknown names are logged and dropped.
    pub fn parse_extra(raw: &str) -> Self {
        let mut set = FlagSet::new();
        for name in raw.split(',').filter(|s| !s.trim().is_empty()) {
            match name.parse::<Flag>() {
                Ok(flag) => set.set(flag, true),
                Err(_) => tracing::warn!(flag = name, "Ignoring unknown stored flag"),
            }
        }
        set
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        FlagSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Flag; N]> for FlagSet {
    fn from(flags: [Flag; N]) -> Self {
        flags.into_iter().collect()
    }
}
