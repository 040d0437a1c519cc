//! Locked patch reconciliation engine.
//!
//! Keeps a templated patch enforced on a target object. Each engine
//! instance watches its target and source objects; whenever one of them is
//! created or updated it re-reads everything, renders the patch template
//! over values extracted from the sources and applies the result to the
//! target through the store's patch endpoint.
//!
//! # Architecture
//!
//! ```text
//! watch event ─► WorkQueue ─► LockedPatchReconciler ─► StatusReporter ─► parent
//!                                 │
//!          resolve ─► extract ─► render ─► convert ─► patch
//! ```
//!
//! - [`extract`] normalizes relaxed field paths and evaluates them
//! - [`resolver`] turns object references into live objects via discovery
//! - [`template`] renders patch text and converts it to a JSON body
//! - [`watch`] registers identity-filtered watches for one engine instance
//! - [`status`] holds the last condition and notifies the parent
//! - [`reconciler`] runs the cycle, [`controller`] drives it from a [`queue`]
//!
//! # Example
//!
//! ```ignore
//! let (notifier, mut changes) = ChannelNotifier::channel(64, BackpressurePolicy::Block);
//! let controller = PatchController::start(
//!     store,
//!     LockedPatch::from_yaml(definition)?,
//!     parent,
//!     Some(Arc::new(notifier)),
//!     &ControllerConfig::default(),
//! )
//! .await?;
//!
//! while let Some(change) = changes.recv().await {
//!     println!("{} -> {:?}", change.patch_key, controller.status());
//! }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod observability;
pub mod patch;
pub mod queue;
pub mod reconciler;
pub mod resolver;
pub mod status;
pub mod template;
pub mod watch;

pub use config::{ControllerConfig, EngineConfig, LoggingConfig, NotificationsConfig};
pub use controller::PatchController;
pub use error::{
    EngineError, ExtractError, NotifyError, ReconcileError, ReconcileStage, ResolveError,
    TemplateError,
};
pub use extract::{extract_field, relaxed_json_path_expression};
pub use patch::LockedPatch;
pub use queue::WorkQueue;
pub use reconciler::{LockedPatchReconciler, Reconciler};
pub use resolver::ReferenceResolver;
pub use status::{
    BackpressurePolicy, BroadcastNotifier, ChannelNotifier, ConditionStatus, PatchConditionType,
    PatchStatus, StatusChangeEvent, StatusObserver, StatusReporter,
};
pub use template::{PatchTemplate, TemplateRenderer, TextTemplateRenderer, to_patch_body};
pub use watch::{EnqueueRequestForPatch, ReferenceModifiedPredicate, WatchRegistrar};

/// Builds the status notifier described by the `[notifications]` section.
pub fn notifier_from_config(
    config: &NotificationsConfig,
) -> (
    ChannelNotifier,
    tokio::sync::mpsc::Receiver<StatusChangeEvent>,
) {
    ChannelNotifier::channel(config.capacity, config.policy)
}
