//! Append-only version ledger of an asset's original content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetVersion {
    pub version: i32,
    pub storage_key: String,
    pub size: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("version ledger cannot be empty")]
    Empty,
    #[error("version ledger out of sequence: expected v{expected}, found v{found}")]
    OutOfSequence { expected: i32, found: i32 },
}

/// Ordered versions `1..=n` of an asset. Entries can only be appended, and
/// the latest version is always the last entry, so it never has to be stored
/// or trusted from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AssetVersion>", into = "Vec<AssetVersion>")]
pub struct VersionLedger(Vec<AssetVersion>);

impl VersionLedger {
    /// Ledger holding only the first version.
    pub fn first(
        storage_key: String,
        size: i64,
        created_by: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self(vec![AssetVersion {
            version: 1,
            storage_key,
            size,
            created_by,
            created_at,
        }])
    }

    /// Rebuild a ledger from persisted entries, checking the sequence.
    pub fn from_entries(mut entries: Vec<AssetVersion>) -> Result<Self, LedgerError> {
        if entries.is_empty() {
            return Err(LedgerError::Empty);
        }
        entries.sort_by_key(|v| v.version);
        for (idx, entry) in entries.iter().enumerate() {
            let expected = idx as i32 + 1;
            if entry.version != expected {
                return Err(LedgerError::OutOfSequence {
                    expected,
                    found: entry.version,
                });
            }
        }
        Ok(Self(entries))
    }

    pub fn latest(&self) -> &AssetVersion {
        // Non-empty by construction
        &self.0[self.0.len() - 1]
    }

    pub fn latest_version(&self) -> i32 {
        self.latest().version
    }

    pub fn next_number(&self) -> i32 {
        self.latest_version() + 1
    }

    /// Version 1, the content verified at finalize.
    pub fn finalized(&self) -> &AssetVersion {
        &self.0[0]
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &AssetVersion> {
        self.0.iter().rev()
    }

    pub fn get(&self, version: i32) -> Option<&AssetVersion> {
        self.0.iter().find(|v| v.version == version)
    }

    pub fn append(
        &mut self,
        storage_key: String,
        size: i64,
        created_by: Uuid,
        created_at: DateTime<Utc>,
    ) -> &AssetVersion {
        let version = self.next_number();
        self.0.push(AssetVersion {
            version,
            storage_key,
            size,
            created_by,
            created_at,
        });
        self.latest()
    }

    /// True when every entry of `self` appears unchanged at the head of `other`.
    pub fn is_prefix_of(&self, other: &VersionLedger) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetVersion> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<AssetVersion>> for VersionLedger {
    type Error = LedgerError;

    fn try_from(value: Vec<AssetVersion>) -> Result<Self, Self::Error> {
        Self::from_entries(value)
    }
}

impl From<VersionLedger> for Vec<AssetVersion> {
    fn from(value: VersionLedger) -> Self {
        value.0
    }
}
