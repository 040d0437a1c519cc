//! Store traits.

use std::sync::Arc;

use async_trait::async_trait;
use patchlock_core::GroupVersionKind;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::types::{ApiResource, PatchType};
use crate::watch::{EventHandler, Predicate, WatchHandle};

/// The object store contract consumed by the reconciliation engine.
///
/// Implementations must be thread-safe (`Send + Sync`). All operations are
/// remote calls from the engine's point of view and may block for their
/// duration; no timeout is imposed here.
///
/// # Example
///
/// ```ignore
/// use patchlock_store::{ObjectStore, PatchType, StoreError};
///
/// async fn scale(store: &dyn ObjectStore, gvk: &GroupVersionKind) -> Result<Value, StoreError> {
///     let deployments = store.discover(gvk).await?;
///     store
///         .patch(&deployments, Some("prod"), "web", PatchType::MergePatch, br#"{"spec":{"replicas":3}}"#)
///         .await
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // ==================== Discovery ====================

    /// Lists the resources served for a group version (`v1`, `apps/v1`).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::GroupVersionNotFound` if the group version is not served.
    async fn server_resources_for_group_version(
        &self,
        group_version: &str,
    ) -> Result<Vec<ApiResource>, StoreError>;

    /// Finds the resource serving a group/version/kind.
    ///
    /// Subresources are skipped. Nothing is cached: every call queries
    /// discovery again, so newly installed kinds become visible immediately.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KindNotFound` if the group version has no resource for the kind.
    async fn discover(&self, gvk: &GroupVersionKind) -> Result<ApiResource, StoreError> {
        let group_version = gvk.group_version().to_string();
        let resources = self
            .server_resources_for_group_version(&group_version)
            .await?;
        let found = resources
            .into_iter()
            .find(|r| r.kind == gvk.kind && !r.is_subresource());
        match found {
            Some(mut resource) => {
                resource.group = gvk.group.clone();
                resource.version = gvk.version.clone();
                debug!(gvk = %gvk, resource = %resource.name, namespaced = resource.namespaced, "Discovered resource");
                Ok(resource)
            }
            None => Err(StoreError::kind_not_found(group_version, &gvk.kind)),
        }
    }

    // ==================== Objects ====================

    /// Fetches an object. `namespace` is `None` for cluster-scoped resources.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError>;

    /// Applies a patch body to an object and returns the patched object.
    ///
    /// Patch semantics are owned by the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist,
    /// `StoreError::InvalidPatch` if the body cannot be applied, and
    /// `StoreError::Conflict` on concurrency failures.
    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch_type: PatchType,
        body: &[u8],
    ) -> Result<Value, StoreError>;

    // ==================== Watches ====================

    /// Watches every object of a resource.
    ///
    /// Events pass through `predicate` before reaching `handler`. Existing
    /// objects are delivered as `Created` events when the watch starts.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::WatchError` if the watch cannot be established.
    async fn watch(
        &self,
        resource: &ApiResource,
        handler: Arc<dyn EventHandler>,
        predicate: Arc<dyn Predicate>,
    ) -> Result<WatchHandle, StoreError>;

    // ==================== Metadata ====================

    /// Returns the name of this store backend for logging.
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test that ObjectStore is object-safe
    fn _assert_store_object_safe(_: &dyn ObjectStore) {}

    struct DiscoveryOnly;

    #[async_trait]
    impl ObjectStore for DiscoveryOnly {
        async fn server_resources_for_group_version(
            &self,
            group_version: &str,
        ) -> Result<Vec<ApiResource>, StoreError> {
            if group_version != "apps/v1" {
                return Err(StoreError::group_version_not_found(group_version));
            }
            let gvk = GroupVersionKind::new("apps", "v1", "Deployment");
            Ok(vec![
                ApiResource::new(&gvk, "deployments/status", true),
                ApiResource::new(&gvk, "deployments", true),
            ])
        }

        async fn get(
            &self,
            resource: &ApiResource,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<Value, StoreError> {
            Err(StoreError::not_found(
                &resource.name,
                namespace.unwrap_or_default(),
                name,
            ))
        }

        async fn patch(
            &self,
            _resource: &ApiResource,
            _namespace: Option<&str>,
            _name: &str,
            _patch_type: PatchType,
            _body: &[u8],
        ) -> Result<Value, StoreError> {
            Err(StoreError::forbidden("read only"))
        }

        async fn watch(
            &self,
            _resource: &ApiResource,
            _handler: Arc<dyn EventHandler>,
            _predicate: Arc<dyn Predicate>,
        ) -> Result<WatchHandle, StoreError> {
            Err(StoreError::watch_error("not supported"))
        }

        fn backend_name(&self) -> &'static str {
            "discovery-only"
        }
    }

    #[tokio::test]
    async fn test_discover_skips_subresources() {
        let gvk = GroupVersionKind::new("apps", "v1", "Deployment");
        let resource = DiscoveryOnly.discover(&gvk).await.unwrap();
        assert_eq!(resource.name, "deployments");
        assert!(resource.namespaced);
    }

    #[tokio::test]
    async fn test_discover_kind_miss() {
        let gvk = GroupVersionKind::new("apps", "v1", "StatefulSet");
        let err = DiscoveryOnly.discover(&gvk).await.unwrap_err();
        assert!(matches!(err, StoreError::KindNotFound { .. }));
    }

    #[tokio::test]
    async fn test_discover_group_version_miss() {
        let gvk = GroupVersionKind::new("batch", "v1", "Job");
        let err = DiscoveryOnly.discover(&gvk).await.unwrap_err();
        assert!(err.is_discovery_miss());
    }
}
