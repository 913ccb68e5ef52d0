//! Background sync.

use serde::Serialize;

/// Result of a background-sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The tag is one this worker handles.
    Acknowledged,
    /// Unknown tag.
    Ignored,
}

impl SyncOutcome {
    /// Classify `tag` against the configured tags.
    pub fn for_tag(tags: &[String], tag: &str) -> Self {
        if tags.iter().any(|t| t == tag) {
            SyncOutcome::Acknowledged
        } else {
            SyncOutcome::Ignored
        }
    }
}
