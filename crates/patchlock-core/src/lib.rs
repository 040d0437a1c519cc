//! # patchlock-core
//!
//! Identity and event types shared by the object store abstraction and the
//! patch reconciliation engine.
//!
//! - [`reference`]: `ObjectReference`, `GroupVersionKind` and friends
//! - [`meta`]: accessors for the `metadata` block of structured objects
//! - [`events`]: watch events and the broadcaster stores publish them on

pub mod error;
pub mod events;
pub mod meta;
pub mod reference;

pub use error::{CoreError, Result};
pub use events::{EventBroadcaster, WatchEvent, WatchEventType};
pub use reference::{GroupVersion, GroupVersionKind, NamespacedName, ObjectReference};
