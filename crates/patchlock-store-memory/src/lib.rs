//! In-memory object store backend.
//!
//! This crate provides an in-memory implementation of the `ObjectStore`
//! trait from `patchlock-store`. It keeps objects in a `DashMap`, serves
//! discovery from registered resource descriptors, publishes watch events
//! on every mutation and implements all four patch types.
//!
//! # Example
//!
//! ```ignore
//! use patchlock_store_memory::InMemoryStore;
//!
//! let store = InMemoryStore::new();
//! store.register_resource(ApiResource::new(&gvk, "configmaps", true));
//! store.create(json!({
//!     "apiVersion": "v1",
//!     "kind": "ConfigMap",
//!     "metadata": {"name": "settings", "namespace": "default"},
//!     "data": {"replicas": "3"}
//! })).await?;
//! ```

pub mod patch;
pub mod storage;

pub use patch::apply_patch;
pub use storage::{InMemoryStore, StorageKey, StoreStats};

// Re-export the ObjectStore trait for convenience
pub use patchlock_store::{ObjectStore, StoreError};
