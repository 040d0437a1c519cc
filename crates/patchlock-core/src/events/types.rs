//! Watch event type definitions.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::meta;
use crate::reference::GroupVersionKind;

/// Type of change observed on a watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
    /// Object was created, or listed during the initial sync of a watch
    Created,
    /// Object was updated
    Updated,
    /// Object was deleted
    Deleted,
    /// Synthetic event not tied to a store mutation
    Generic,
}

impl WatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Created => "created",
            WatchEventType::Updated => "updated",
            WatchEventType::Deleted => "deleted",
            WatchEventType::Generic => "generic",
        }
    }
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event representing a change to a store object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Type of change
    pub event_type: WatchEventType,
    /// Type identity of the object
    pub gvk: GroupVersionKind,
    /// The object after the change; the last known state for deletions
    pub object: serde_json::Value,
    /// Timestamp of the event
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WatchEvent {
    pub fn new(
        event_type: WatchEventType,
        gvk: GroupVersionKind,
        object: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            gvk,
            object,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn created(gvk: GroupVersionKind, object: serde_json::Value) -> Self {
        Self::new(WatchEventType::Created, gvk, object)
    }

    pub fn updated(gvk: GroupVersionKind, object: serde_json::Value) -> Self {
        Self::new(WatchEventType::Updated, gvk, object)
    }

    pub fn deleted(gvk: GroupVersionKind, object: serde_json::Value) -> Self {
        Self::new(WatchEventType::Deleted, gvk, object)
    }

    pub fn generic(gvk: GroupVersionKind, object: serde_json::Value) -> Self {
        Self::new(WatchEventType::Generic, gvk, object)
    }

    pub fn name(&self) -> &str {
        meta::name(&self.object)
    }

    pub fn namespace(&self) -> &str {
        meta::namespace(&self.object)
    }

    /// Check if this event concerns objects of the given group and kind.
    ///
    /// The version is ignored: one object is visible through every served version.
    pub fn matches_kind(&self, group: &str, kind: &str) -> bool {
        self.gvk.group == group && self.gvk.kind == kind
    }
}
