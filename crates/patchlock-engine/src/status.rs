//! Patch status and status-change notification.
//!
//! Each engine instance holds exactly one [`PatchStatus`], overwritten on
//! every reconcile outcome. After every write the [`StatusReporter`] tells
//! an optional [`StatusObserver`] that the parent configuration should
//! re-read its children's statuses. The notification carries the parent
//! reference only, never the condition.
//!
//! Backpressure is explicit:
//!
//! | notifier                         | full queue                         |
//! |----------------------------------|------------------------------------|
//! | [`ChannelNotifier`] + `Block`    | reconcile waits for space          |
//! | [`ChannelNotifier`] + `FailFast` | notification dropped, warning logs |
//! | [`BroadcastNotifier`]            | oldest queued notification dropped |

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use patchlock_core::ObjectReference;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::NotifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatchConditionType {
    /// The patch was applied and is being enforced.
    Enforcing,
    /// The last cycle failed; enforcement is not guaranteed.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchStatus {
    #[serde(rename = "type")]
    pub condition_type: PatchConditionType,
    pub status: ConditionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update_time: OffsetDateTime,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl PatchStatus {
    /// Status of an instance that has not completed a cycle yet.
    pub fn pending() -> Self {
        Self {
            condition_type: PatchConditionType::Enforcing,
            status: ConditionStatus::Unknown,
            last_update_time: OffsetDateTime::now_utc(),
            message: "awaiting first reconcile".to_string(),
        }
    }

    pub fn enforcing() -> Self {
        Self {
            condition_type: PatchConditionType::Enforcing,
            status: ConditionStatus::True,
            last_update_time: OffsetDateTime::now_utc(),
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            condition_type: PatchConditionType::Failure,
            status: ConditionStatus::True,
            last_update_time: OffsetDateTime::now_utc(),
            message: message.into(),
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.condition_type == PatchConditionType::Enforcing && self.status == ConditionStatus::True
    }

    pub fn is_failure(&self) -> bool {
        self.condition_type == PatchConditionType::Failure
    }
}

/// Sent to the parent after every status write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeEvent {
    /// The owning parent configuration.
    pub parent: ObjectReference,
    /// Key of the engine instance whose status changed.
    pub patch_key: String,
}

/// Receives status change notifications.
#[async_trait]
pub trait StatusObserver: Send + Sync {
    async fn notify(&self, event: StatusChangeEvent) -> Result<(), NotifyError>;
}

/// What a bounded channel does when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the parent to drain the channel.
    #[default]
    Block,
    /// Drop the notification with `NotifyError::Full`.
    FailFast,
}

/// Bounded mpsc notifier.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<StatusChangeEvent>,
    policy: BackpressurePolicy,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::Sender<StatusChangeEvent>, policy: BackpressurePolicy) -> Self {
        Self { sender, policy }
    }

    /// Creates a notifier and the receiver the parent drains.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn channel(
        capacity: usize,
        policy: BackpressurePolicy,
    ) -> (Self, mpsc::Receiver<StatusChangeEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender, policy), receiver)
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}

#[async_trait]
impl StatusObserver for ChannelNotifier {
    async fn notify(&self, event: StatusChangeEvent) -> Result<(), NotifyError> {
        match self.policy {
            BackpressurePolicy::Block => self
                .sender
                .send(event)
                .await
                .map_err(|_| NotifyError::Closed),
            BackpressurePolicy::FailFast => self.sender.try_send(event).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => NotifyError::Full,
                mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
            }),
        }
    }
}

/// Broadcast notifier: lagging receivers lose the oldest notifications.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StatusChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl StatusObserver for BroadcastNotifier {
    async fn notify(&self, event: StatusChangeEvent) -> Result<(), NotifyError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| NotifyError::Closed)
    }
}

/// Holds the current status of one engine instance and announces changes.
pub struct StatusReporter {
    status: RwLock<PatchStatus>,
    parent: ObjectReference,
    patch_key: String,
    observer: Option<Arc<dyn StatusObserver>>,
}

impl StatusReporter {
    pub fn new(
        parent: ObjectReference,
        patch_key: impl Into<String>,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Self {
        Self {
            status: RwLock::new(PatchStatus::pending()),
            parent,
            patch_key: patch_key.into(),
            observer,
        }
    }

    /// Stores `status` and notifies the observer, if any.
    ///
    /// Notification failures are logged; the status write always sticks.
    pub async fn set_status(&self, status: PatchStatus) {
        debug!(
            patch = %self.patch_key,
            condition = ?status.condition_type,
            status = ?status.status,
            "Setting patch status"
        );
        *self
            .status
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = status;

        if let Some(observer) = &self.observer {
            let event = StatusChangeEvent {
                parent: self.parent.clone(),
                patch_key: self.patch_key.clone(),
            };
            if let Err(e) = observer.notify(event).await {
                warn!(patch = %self.patch_key, parent = %self.parent, error = %e, "Status notification dropped");
            }
        }
    }

    /// Last stored status.
    pub fn status(&self) -> PatchStatus {
        self.status
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn parent(&self) -> &ObjectReference {
        &self.parent
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("patch_key", &self.patch_key)
            .field("parent", &self.parent)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}
