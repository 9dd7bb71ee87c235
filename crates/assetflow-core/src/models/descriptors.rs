use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form string metadata supplied by the uploader.
pub type CustomMetadata = BTreeMap<String, String>;

/// Technical metadata extracted from the content by processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Bits per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ExtractedMetadata {
    /// Overlay the fields present in `other`.
    pub fn merge(&mut self, other: ExtractedMetadata) {
        fn overlay<T>(slot: &mut Option<T>, incoming: Option<T>) {
            if incoming.is_some() {
                *slot = incoming;
            }
        }
        overlay(&mut self.width, other.width);
        overlay(&mut self.height, other.height);
        overlay(&mut self.duration, other.duration);
        overlay(&mut self.codec, other.codec);
        overlay(&mut self.bitrate, other.bitrate);
        overlay(&mut self.page_count, other.page_count);
        overlay(&mut self.format, other.format);
    }

    pub fn is_empty(&self) -> bool {
        self == &ExtractedMetadata::default()
    }
}
