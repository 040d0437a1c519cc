use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use patchlock_core::{EventBroadcaster, GroupVersionKind, WatchEvent, meta};
use patchlock_store::{
    ApiResource, EventHandler, ObjectStore, PatchType, Predicate, StoreError, WatchHandle,
};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::patch::apply_patch;

pub type StorageKey = String; // Format: "group/resource/namespace/name"

pub(crate) fn make_storage_key(
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
) -> StorageKey {
    format!(
        "{}/{}/{}/{}",
        resource.group,
        resource.name,
        namespace.unwrap_or_default(),
        name
    )
}

fn make_resource_prefix(resource: &ApiResource) -> String {
    format!("{}/{}/", resource.group, resource.name)
}

/// Counters of remote-style calls served by the store.
#[derive(Debug, Default)]
pub struct StoreStats {
    gets: AtomicU64,
    patches: AtomicU64,
    watches: AtomicU64,
}

impl StoreStats {
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn patches(&self) -> u64 {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn watches(&self) -> u64 {
        self.watches.load(Ordering::SeqCst)
    }
}

/// In-memory object store.
///
/// This store provides:
/// - Discovery over explicitly registered resource descriptors
/// - Object CRUD with `resourceVersion`, `uid` and `creationTimestamp` bookkeeping
/// - Watch events for every mutation, with an initial listing per watch
/// - JSON, merge, strategic merge and apply patches
///
/// Objects are keyed by group and plural resource name, so one object is
/// visible through every registered version of its kind.
#[derive(Debug)]
pub struct InMemoryStore {
    /// Discovery documents: group version -> served resources
    discovery: RwLock<HashMap<String, Vec<ApiResource>>>,
    /// Object data
    data: DashMap<StorageKey, Value>,
    /// Watch event bus
    broadcaster: EventBroadcaster,
    /// Atomic counter for generating resource versions
    version_counter: AtomicU64,
    stats: StoreStats,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            discovery: RwLock::new(HashMap::new()),
            data: DashMap::new(),
            broadcaster: EventBroadcaster::new(),
            version_counter: AtomicU64::new(1),
            stats: StoreStats::default(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes a resource visible to discovery.
    pub fn register_resource(&self, resource: ApiResource) {
        let group_version = resource.group_version().to_string();
        let mut discovery = self
            .discovery
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let served = discovery.entry(group_version).or_default();
        served.retain(|r| r.name != resource.name);
        debug!(resource = %resource.name, gvk = %resource.gvk(), "Registered resource");
        served.push(resource);
    }

    /// Removes a resource from discovery. Stored objects are kept.
    pub fn unregister_resource(&self, gvk: &GroupVersionKind) {
        let mut discovery = self
            .discovery
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(served) = discovery.get_mut(&gvk.group_version().to_string()) {
            served.retain(|r| r.kind != gvk.kind);
        }
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    async fn resource_for(&self, object: &Value) -> Result<ApiResource, StoreError> {
        let gvk = GroupVersionKind::from_api_version_and_kind(meta::api_version(object), meta::kind(object))
            .map_err(|e| StoreError::internal(e.to_string()))?;
        self.discover(&gvk).await
    }

    fn is_served(&self, resource: &ApiResource) -> bool {
        let discovery = self
            .discovery
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        discovery
            .get(&resource.group_version().to_string())
            .is_some_and(|served| served.iter().any(|r| r.name == resource.name))
    }

    /// Creates an object. Its kind must be registered.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if an object with the same identity exists.
    pub async fn create(&self, mut object: Value) -> Result<Value, StoreError> {
        let resource = self.resource_for(&object).await?;
        let name = meta::name(&object).to_string();
        if name.is_empty() {
            return Err(StoreError::invalid_patch("metadata.name is required"));
        }
        let namespace = resource.scope(meta::namespace(&object)).map(str::to_string);
        let key = make_storage_key(&resource, namespace.as_deref(), &name);

        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| StoreError::internal(e.to_string()))?;
        let metadata = meta::metadata_mut(&mut object)
            .ok_or_else(|| StoreError::internal("object must be a map"))?;
        if namespace.is_none() {
            metadata.remove("namespace");
        }
        metadata.insert("uid".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        metadata.insert("resourceVersion".into(), Value::String(self.next_version()));
        metadata.insert("creationTimestamp".into(), Value::String(created_at));

        match self.data.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::already_exists(&resource.name, &name));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(object.clone());
            }
        }

        self.emit(WatchEvent::created(resource.gvk(), object.clone()));
        Ok(object)
    }

    /// Replaces an object.
    ///
    /// If the new object carries a `resourceVersion`, it must match the stored one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist and
    /// `StoreError::Conflict` on a stale `resourceVersion`.
    pub async fn update(&self, mut object: Value) -> Result<Value, StoreError> {
        let resource = self.resource_for(&object).await?;
        let name = meta::name(&object).to_string();
        let namespace = resource.scope(meta::namespace(&object)).map(str::to_string);
        let key = make_storage_key(&resource, namespace.as_deref(), &name);

        {
            let mut entry = self.data.get_mut(&key).ok_or_else(|| {
                StoreError::not_found(&resource.name, namespace.clone().unwrap_or_default(), &name)
            })?;
            let current = entry.value_mut();

            let expected = meta::resource_version(&object);
            if !expected.is_empty() && expected != meta::resource_version(current) {
                return Err(StoreError::conflict(
                    &resource.name,
                    &name,
                    format!(
                        "resourceVersion {expected} does not match {}",
                        meta::resource_version(current)
                    ),
                ));
            }

            let uid = meta::uid(current).to_string();
            let created = current
                .get("metadata")
                .and_then(|m| m.get("creationTimestamp"))
                .cloned()
                .unwrap_or(Value::Null);
            let metadata = meta::metadata_mut(&mut object)
                .ok_or_else(|| StoreError::internal("object must be a map"))?;
            metadata.insert("uid".into(), Value::String(uid));
            metadata.insert("creationTimestamp".into(), created);
            metadata.insert("resourceVersion".into(), Value::String(self.next_version()));

            *current = object.clone();
        }

        self.emit(WatchEvent::updated(resource.gvk(), object.clone()));
        Ok(object)
    }

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    pub async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let resource = self.discover(gvk).await?;
        let scoped = resource.scope(namespace);
        let key = make_storage_key(&resource, scoped, name);
        let (_, object) = self.data.remove(&key).ok_or_else(|| {
            StoreError::not_found(&resource.name, scoped.unwrap_or_default(), name)
        })?;
        self.emit(WatchEvent::deleted(resource.gvk(), object));
        Ok(())
    }

    /// Publishes a synthetic event for an object without changing it.
    pub fn emit_generic(&self, gvk: GroupVersionKind, object: Value) -> usize {
        self.emit(WatchEvent::generic(gvk, object))
    }

    fn emit(&self, event: WatchEvent) -> usize {
        if !self.broadcaster.has_subscribers() {
            return 0;
        }
        let event_type = event.event_type;
        let gvk = event.gvk.clone();
        let name = event.name().to_string();
        let count = self.broadcaster.send(event);
        debug!(
            event_type = %event_type,
            gvk = %gvk,
            name = %name,
            subscribers = count,
            "Emitted watch event"
        );
        count
    }

    fn list_resource(&self, resource: &ApiResource) -> Vec<Value> {
        let prefix = make_resource_prefix(resource);
        self.data
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn server_resources_for_group_version(
        &self,
        group_version: &str,
    ) -> Result<Vec<ApiResource>, StoreError> {
        let discovery = self
            .discovery
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        discovery
            .get(group_version)
            .cloned()
            .ok_or_else(|| StoreError::group_version_not_found(group_version))
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        self.stats.gets.fetch_add(1, Ordering::SeqCst);
        let key = make_storage_key(resource, namespace, name);
        self.data
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(&resource.name, namespace.unwrap_or_default(), name))
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch_type: PatchType,
        body: &[u8],
    ) -> Result<Value, StoreError> {
        self.stats.patches.fetch_add(1, Ordering::SeqCst);
        let key = make_storage_key(resource, namespace, name);

        let patched = {
            let mut entry = self.data.get_mut(&key).ok_or_else(|| {
                StoreError::not_found(&resource.name, namespace.unwrap_or_default(), name)
            })?;
            let current = entry.value_mut();
            let mut patched = apply_patch(current, patch_type, body)?;

            if patched == *current {
                debug!(resource = %resource.name, name = %name, "Patch is a no-op");
                return Ok(patched);
            }

            if let Some(metadata) = meta::metadata_mut(&mut patched) {
                metadata.insert("resourceVersion".into(), Value::String(self.next_version()));
            }
            *current = patched.clone();
            patched
        };

        self.emit(WatchEvent::updated(resource.gvk(), patched.clone()));
        Ok(patched)
    }

    async fn watch(
        &self,
        resource: &ApiResource,
        handler: Arc<dyn EventHandler>,
        predicate: Arc<dyn Predicate>,
    ) -> Result<WatchHandle, StoreError> {
        if !self.is_served(resource) {
            return Err(StoreError::watch_error(format!(
                "resource {} is not served for {}",
                resource.name,
                resource.group_version()
            )));
        }
        self.stats.watches.fetch_add(1, Ordering::SeqCst);

        // Subscribe before listing so nothing falls between the two.
        let receiver = self.broadcaster.subscribe();
        let existing = self.list_resource(resource);
        let gvk = resource.gvk();
        let resource_name = resource.name.clone();

        let task = tokio::spawn(run_watch(
            resource_name,
            gvk,
            existing,
            receiver,
            handler,
            predicate,
        ));
        Ok(WatchHandle::new(resource.clone(), task))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

async fn run_watch(
    resource_name: String,
    gvk: GroupVersionKind,
    existing: Vec<Value>,
    mut receiver: broadcast::Receiver<WatchEvent>,
    handler: Arc<dyn EventHandler>,
    predicate: Arc<dyn Predicate>,
) {
    debug!(resource = %resource_name, existing = existing.len(), "Starting watch");

    for object in existing {
        let event = WatchEvent::created(gvk.clone(), object);
        if predicate.filter(&event) {
            handler.handle(&event);
        }
    }

    loop {
        match receiver.recv().await {
            Ok(event) => {
                if event.matches_kind(&gvk.group, &gvk.kind) && predicate.filter(&event) {
                    handler.handle(&event);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(resource = %resource_name, missed = n, "Watch lagged, missed events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(resource = %resource_name, "Watch channel closed, stopping");
                break;
            }
        }
    }
}
