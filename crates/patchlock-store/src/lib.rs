//! # patchlock-store
//!
//! Object store abstraction consumed by the patch reconciliation engine.
//!
//! This crate defines the traits and types every store backend implements.
//! It does not contain any implementations - those live in separate crates.
//!
//! ## Overview
//!
//! The main trait is [`ObjectStore`], which defines the contract for:
//! - Discovery (resource name and scope for a group/version/kind)
//! - Fetching objects by namespace and name
//! - Applying patches with a given [`PatchType`]
//! - Watching a resource kind with a [`Predicate`] and an [`EventHandler`]
//!
//! ## Example
//!
//! ```ignore
//! use patchlock_store::{ObjectStore, StoreError};
//!
//! async fn fetch(store: &dyn ObjectStore, gvk: &GroupVersionKind) -> Result<Value, StoreError> {
//!     let resource = store.discover(gvk).await?;
//!     store.get(&resource, Some("default"), "settings").await
//! }
//! ```

mod error;
mod traits;
mod types;
pub mod watch;

pub use error::{ErrorCategory, StoreError};
pub use traits::ObjectStore;
pub use types::{ApiResource, PatchType};
pub use watch::{AcceptAll, EventHandler, Predicate, WatchHandle};

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn ObjectStore>;
