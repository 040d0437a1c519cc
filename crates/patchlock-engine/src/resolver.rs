//! Store-backed object reference resolver.
//!
//! Resolution never caches discovery: each call asks the store which
//! resource serves the reference's kind, so kinds installed after the
//! engine started are picked up without a restart.

use patchlock_core::ObjectReference;
use patchlock_store::{ApiResource, DynStore};
use serde_json::Value;
use tracing::debug;

use crate::error::ResolveError;

/// Resolves object references to live objects.
#[derive(Clone)]
pub struct ReferenceResolver {
    store: DynStore,
}

impl ReferenceResolver {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Discovers the resource serving the reference's kind.
    pub async fn resolve_resource(
        &self,
        reference: &ObjectReference,
    ) -> Result<ApiResource, ResolveError> {
        let gvk = reference.group_version_kind()?;
        Ok(self.store.discover(&gvk).await?)
    }

    /// Fetches the referenced object.
    pub async fn resolve(&self, reference: &ObjectReference) -> Result<Value, ResolveError> {
        let (_, object) = self.resolve_with_resource(reference).await?;
        debug!(
            reference = %reference,
            resource_version = patchlock_core::meta::resource_version(&object),
            "Resolved reference"
        );
        Ok(object)
    }

    /// Fetches the referenced object together with its resource descriptor.
    pub async fn resolve_with_resource(
        &self,
        reference: &ObjectReference,
    ) -> Result<(ApiResource, Value), ResolveError> {
        let resource = self.resolve_resource(reference).await?;
        let object = self
            .store
            .get(&resource, resource.scope(&reference.namespace), &reference.name)
            .await?;
        Ok((resource, object))
    }
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchlock_core::GroupVersionKind;
    use patchlock_store_memory::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    async fn store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::shared();
        store.register_resource(ApiResource::new(
            &GroupVersionKind::new("", "v1", "ConfigMap"),
            "configmaps",
            true,
        ));
        store.register_resource(ApiResource::new(
            &GroupVersionKind::new("", "v1", "Namespace"),
            "namespaces",
            false,
        ));
        store
            .create(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "settings", "namespace": "prod"},
                "data": {"replicas": "3"}
            }))
            .await
            .unwrap();
        store
            .create(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "prod"}}))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolve_namespaced() {
        let resolver = ReferenceResolver::new(store().await);
        let object = resolver
            .resolve(&ObjectReference::new("v1", "ConfigMap", "prod", "settings"))
            .await
            .unwrap();
        assert_eq!(object["data"]["replicas"], "3");
    }

    #[tokio::test]
    async fn test_resolve_cluster_scoped_ignores_namespace() {
        let resolver = ReferenceResolver::new(store().await);
        let object = resolver
            .resolve(&ObjectReference::new("v1", "Namespace", "anything", "prod"))
            .await
            .unwrap();
        assert_eq!(object["metadata"]["name"], "prod");
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let resolver = ReferenceResolver::new(store().await);

        let err = resolver
            .resolve(&ObjectReference::new("v1", "ConfigMap", "prod", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = resolver
            .resolve(&ObjectReference::new("v1", "Widget", "prod", "w"))
            .await
            .unwrap_err();
        assert!(err.is_discovery_miss());

        let err = resolver
            .resolve(&ObjectReference::new("a/b/c", "Widget", "prod", "w"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidReference(_)));
    }
}
