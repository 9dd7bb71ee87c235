use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived artifact produced by processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RenditionKind {
    #[serde(rename = "thumbnail_small")]
    ThumbnailSmall,
    #[serde(rename = "thumbnail_large")]
    ThumbnailLarge,
    #[serde(rename = "preview_720p")]
    Preview720p,
}

impl RenditionKind {
    pub const ALL: [RenditionKind; 3] = [
        RenditionKind::ThumbnailSmall,
        RenditionKind::ThumbnailLarge,
        RenditionKind::Preview720p,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionKind::ThumbnailSmall => "thumbnail_small",
            RenditionKind::ThumbnailLarge => "thumbnail_large",
            RenditionKind::Preview720p => "preview_720p",
        }
    }
}

impl Display for RenditionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenditionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RenditionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid rendition kind: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub storage_key: String,
    pub width: i32,
    pub height: i32,
    pub size: i64,
    pub content_type: String,
    pub generated_at: DateTime<Utc>,
}

/// Renditions keyed by kind. A kind is present only once it has been
/// produced, and merging never drops a kind that is already present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenditionSet(BTreeMap<RenditionKind, Rendition>);

impl RenditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: RenditionKind, rendition: Rendition) {
        self.0.insert(kind, rendition);
    }

    /// Add or replace the renditions in `other`; others are kept.
    pub fn merge(&mut self, other: RenditionSet) {
        self.0.extend(other.0);
    }

    pub fn get(&self, kind: RenditionKind) -> Option<&Rendition> {
        self.0.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RenditionKind, &Rendition)> {
        self.0.iter()
    }

    pub fn storage_keys(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(|r| r.storage_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(RenditionKind, Rendition)> for RenditionSet {
    fn from_iter<T: IntoIterator<Item = (RenditionKind, Rendition)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
