//! The locked patch reconcile cycle.
//!
//! One cycle: resolve the target, resolve each source and extract its field,
//! render the template over the extracted values, convert the rendered text
//! to a JSON body and patch the target. Any failure aborts the cycle, sets a
//! `Failure` status carrying the error text and hands the error back to the
//! caller, which owns retries. Success sets `Enforcing`.
//!
//! Nothing is cached between cycles except the last status.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use patchlock_core::ObjectReference;
use patchlock_store::DynStore;
use serde_json::Value;
use tracing::{Instrument, debug, error, info_span};

use crate::error::{EngineError, ReconcileError};
use crate::extract::extract_field;
use crate::patch::LockedPatch;
use crate::resolver::ReferenceResolver;
use crate::status::{PatchStatus, StatusObserver, StatusReporter};
use crate::template::{TemplateRenderer, TextTemplateRenderer, to_patch_body};

/// A unit of reconcile work, invoked by the host scheduler with a queue key.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError>;
}

pub struct LockedPatchReconciler {
    patch: LockedPatch,
    key: String,
    resolver: ReferenceResolver,
    renderer: Arc<dyn TemplateRenderer>,
    reporter: StatusReporter,
    cycles: AtomicU64,
}

impl LockedPatchReconciler {
    /// Builds a reconciler for `patch`.
    ///
    /// `parent` is the owning configuration object; it is only used as the
    /// payload of status notifications sent to `observer`.
    pub fn new(
        store: DynStore,
        patch: LockedPatch,
        parent: ObjectReference,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<Self, EngineError> {
        patch.validate()?;
        let key = patch.key();
        Ok(Self {
            reporter: StatusReporter::new(parent, key.clone(), observer),
            resolver: ReferenceResolver::new(store),
            renderer: Arc::new(TextTemplateRenderer),
            cycles: AtomicU64::new(0),
            patch,
            key,
        })
    }

    /// Replaces the render stage.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn patch(&self) -> &LockedPatch {
        &self.patch
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    /// Last recorded status.
    pub fn status(&self) -> PatchStatus {
        self.reporter.status()
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Runs one full cycle and records its outcome.
    pub async fn reconcile_once(&self) -> Result<(), ReconcileError> {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("reconcile", patch = %self.key, cycle);
        async {
            match self.run_cycle().await {
                Ok(()) => {
                    self.manage_success().await;
                    Ok(())
                }
                Err(e) => Err(self.manage_error(e).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_cycle(&self) -> Result<(), ReconcileError> {
        let target_ref = &self.patch.target_object_ref;
        let (target_resource, _) = self
            .resolver
            .resolve_with_resource(target_ref)
            .await
            .map_err(|source| ReconcileError::Resolve {
                reference: target_ref.clone(),
                source,
            })?;

        let mut values = Vec::with_capacity(self.patch.source_object_refs.len());
        for source_ref in &self.patch.source_object_refs {
            let object = self.resolver.resolve(source_ref).await.map_err(|source| {
                ReconcileError::Resolve {
                    reference: source_ref.clone(),
                    source,
                }
            })?;
            let value = extract_field(&object, &source_ref.field_path).map_err(|source| {
                ReconcileError::Extract {
                    reference: source_ref.clone(),
                    field_path: source_ref.field_path.clone(),
                    source,
                }
            })?;
            values.push(value);
        }

        let rendered = self
            .renderer
            .render(&self.patch.patch_template, &values)
            .map_err(ReconcileError::Render)?;
        let body = to_patch_body(&rendered).map_err(ReconcileError::Convert)?;
        debug!(
            patch_type = %self.patch.patch_type,
            body = %String::from_utf8_lossy(&body),
            "Applying patch"
        );

        let patched: Value = self
            .resolver
            .store()
            .patch(
                &target_resource,
                target_resource.scope(&target_ref.namespace),
                &target_ref.name,
                self.patch.patch_type,
                &body,
            )
            .await
            .map_err(|source| ReconcileError::Apply {
                reference: target_ref.clone(),
                source,
            })?;
        debug!(
            resource_version = patchlock_core::meta::resource_version(&patched),
            "Patch applied"
        );
        Ok(())
    }

    async fn manage_error(&self, error: ReconcileError) -> ReconcileError {
        match error.reference() {
            Some(reference) => error!(
                stage = %error.stage(),
                reference = %reference,
                error = %error,
                "Reconcile failed"
            ),
            None => error!(stage = %error.stage(), error = %error, "Reconcile failed"),
        }
        self.reporter
            .set_status(PatchStatus::failure(error.to_string()))
            .await;
        error
    }

    async fn manage_success(&self) {
        debug!("Patch enforced");
        self.reporter.set_status(PatchStatus::enforcing()).await;
    }
}

#[async_trait]
impl Reconciler for LockedPatchReconciler {
    async fn reconcile(&self, _key: &str) -> Result<(), ReconcileError> {
        self.reconcile_once().await
    }
}

impl std::fmt::Debug for LockedPatchReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedPatchReconciler")
            .field("key", &self.key)
            .field("cycles", &self.cycles())
            .finish_non_exhaustive()
    }
}
