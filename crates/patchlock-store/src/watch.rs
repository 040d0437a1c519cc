//! Watch plumbing: predicates filter events, handlers react to them.
//!
//! A store delivers every event for a watched kind to the watch's
//! [`Predicate`]; events that pass are handed to its [`EventHandler`].
//! Handlers must be quick and non-blocking; heavy work belongs on a queue.

use patchlock_core::{WatchEvent, WatchEventType};
use tokio::task::JoinHandle;

use crate::types::ApiResource;

/// Event filter attached to a watch.
///
/// Every method defaults to accepting the event; override the ones to narrow.
pub trait Predicate: Send + Sync {
    fn create(&self, _event: &WatchEvent) -> bool {
        true
    }

    fn update(&self, _event: &WatchEvent) -> bool {
        true
    }

    fn delete(&self, _event: &WatchEvent) -> bool {
        true
    }

    fn generic(&self, _event: &WatchEvent) -> bool {
        true
    }

    /// Dispatches to the method for the event's type.
    fn filter(&self, event: &WatchEvent) -> bool {
        match event.event_type {
            WatchEventType::Created => self.create(event),
            WatchEventType::Updated => self.update(event),
            WatchEventType::Deleted => self.delete(event),
            WatchEventType::Generic => self.generic(event),
        }
    }
}

/// Predicate that accepts every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Predicate for AcceptAll {}

/// Reacts to events that passed a watch's predicate.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &WatchEvent);
}

/// Handle to an established watch.
///
/// The watch stays active until the handle is stopped or dropped.
#[derive(Debug)]
pub struct WatchHandle {
    resource: ApiResource,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn new(resource: ApiResource, task: JoinHandle<()>) -> Self {
        Self { resource, task }
    }

    /// The resource this watch observes.
    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Deregisters the watch.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchlock_core::GroupVersionKind;
    use serde_json::json;

    struct CreatesOnly;

    impl Predicate for CreatesOnly {
        fn update(&self, _event: &WatchEvent) -> bool {
            false
        }

        fn delete(&self, _event: &WatchEvent) -> bool {
            false
        }

        fn generic(&self, _event: &WatchEvent) -> bool {
            false
        }
    }

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "ConfigMap")
    }

    #[test]
    fn test_filter_dispatch() {
        let p = CreatesOnly;
        assert!(p.filter(&WatchEvent::created(gvk(), json!({}))));
        assert!(!p.filter(&WatchEvent::updated(gvk(), json!({}))));
        assert!(!p.filter(&WatchEvent::deleted(gvk(), json!({}))));
        assert!(!p.filter(&WatchEvent::generic(gvk(), json!({}))));
    }

    #[test]
    fn test_accept_all() {
        assert!(AcceptAll.filter(&WatchEvent::deleted(gvk(), json!({}))));
        assert!(AcceptAll.filter(&WatchEvent::generic(gvk(), json!({}))));
    }

    #[tokio::test]
    async fn test_watch_handle_stop_aborts_task() {
        let task = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        let handle = WatchHandle::new(ApiResource::new(&gvk(), "configmaps", true), task);
        assert!(handle.is_active());
        assert_eq!(handle.resource().name, "configmaps");
        handle.stop();
    }
}
