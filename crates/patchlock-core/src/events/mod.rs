//! Watch events published by object stores.
//!
//! ```text
//!  store mutation ──► EventBroadcaster ──► watch task ──► predicate ──► handler
//!                    (tokio broadcast)     (per watch)
//! ```
//!
//! Stores emit one [`WatchEvent`] after every successful create, update or
//! delete. Each registered watch owns a receiver and filters events by kind
//! before handing them to its predicate.

pub mod broadcaster;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use types::{WatchEvent, WatchEventType};
