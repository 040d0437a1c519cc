//! Watch registration for one engine instance.
//!
//! Every referenced object (target and sources) gets a watch on its kind,
//! filtered by [`ReferenceModifiedPredicate`] so that only events for that
//! exact object pass, and handled by [`EnqueueRequestForPatch`], which
//! always enqueues the engine's single reconcile key.

use std::collections::HashSet;
use std::sync::Arc;

use patchlock_core::{ObjectReference, WatchEvent};
use patchlock_store::{EventHandler, Predicate, WatchHandle};
use tracing::{debug, info, trace};

use crate::error::{EngineError, ResolveError};
use crate::queue::WorkQueue;
use crate::resolver::ReferenceResolver;

/// Passes creates and updates of one named object; drops deletes and
/// synthetic events.
///
/// A deleted reference gives nothing to compute a patch from, so the last
/// applied patch simply stays in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceModifiedPredicate {
    namespace: String,
    name: String,
}

impl ReferenceModifiedPredicate {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn matches(&self, event: &WatchEvent) -> bool {
        event.name() == self.name && event.namespace() == self.namespace
    }
}

impl Predicate for ReferenceModifiedPredicate {
    fn create(&self, event: &WatchEvent) -> bool {
        self.matches(event)
    }

    fn update(&self, event: &WatchEvent) -> bool {
        self.matches(event)
    }

    fn delete(&self, _event: &WatchEvent) -> bool {
        false
    }

    fn generic(&self, _event: &WatchEvent) -> bool {
        false
    }
}

/// Enqueues the same fixed key for every event it receives.
#[derive(Debug, Clone)]
pub struct EnqueueRequestForPatch {
    queue: Arc<WorkQueue>,
    key: String,
}

impl EnqueueRequestForPatch {
    pub fn new(queue: Arc<WorkQueue>, key: impl Into<String>) -> Self {
        Self {
            queue,
            key: key.into(),
        }
    }
}

impl EventHandler for EnqueueRequestForPatch {
    fn handle(&self, event: &WatchEvent) {
        trace!(
            key = %self.key,
            event_type = %event.event_type,
            object = %event.name(),
            "Enqueueing reconcile"
        );
        self.queue.add(self.key.clone());
    }
}

/// Identity of a watched object. The version is left out: one kind is one
/// watch no matter which version a reference names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    group: String,
    kind: String,
    namespace: String,
    name: String,
}

/// Establishes the watches of one engine instance.
pub struct WatchRegistrar {
    resolver: ReferenceResolver,
    handler: Arc<dyn EventHandler>,
}

impl WatchRegistrar {
    pub fn new(resolver: ReferenceResolver, handler: Arc<dyn EventHandler>) -> Self {
        Self { resolver, handler }
    }

    /// Registers one watch per distinct referenced object.
    ///
    /// Fails on the first reference that cannot be watched; watches already
    /// established are dropped, which stops them.
    pub async fn register<'a>(
        &self,
        references: impl IntoIterator<Item = &'a ObjectReference>,
    ) -> Result<Vec<WatchHandle>, EngineError> {
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for reference in references {
            let gvk = reference
                .group_version_kind()
                .map_err(|source| EngineError::InvalidReference {
                    reference: reference.clone(),
                    source,
                })?;
            let resource = self
                .resolver
                .resolve_resource(reference)
                .await
                .map_err(|e| watch_error(reference, e))?;
            // Cluster-scoped objects carry no namespace in their events.
            let namespace = resource.scope(&reference.namespace).unwrap_or_default();

            let key = WatchKey {
                group: gvk.group.clone(),
                kind: gvk.kind.clone(),
                namespace: namespace.to_string(),
                name: reference.name.clone(),
            };
            if !seen.insert(key) {
                debug!(reference = %reference, "Reference already watched");
                continue;
            }

            let predicate = Arc::new(ReferenceModifiedPredicate::new(namespace, &reference.name));
            let handle = self
                .resolver
                .store()
                .watch(&resource, Arc::clone(&self.handler), predicate)
                .await
                .map_err(|source| EngineError::Watch {
                    reference: reference.clone(),
                    source,
                })?;
            info!(reference = %reference, resource = %resource.name, "Watching reference");
            handles.push(handle);
        }

        Ok(handles)
    }
}

fn watch_error(reference: &ObjectReference, error: ResolveError) -> EngineError {
    match error {
        ResolveError::InvalidReference(source) => EngineError::InvalidReference {
            reference: reference.clone(),
            source,
        },
        ResolveError::Store(source) => EngineError::Watch {
            reference: reference.clone(),
            source,
        },
    }
}

impl std::fmt::Debug for WatchRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistrar")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
