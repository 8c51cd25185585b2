//! Request-versioned metadata cache.
//!
//! Every property of every cached file carries the id of the request that last touched it.
//! Request ids come from a single counter in [`MetadataCacheSet`] and only grow, so a result
//! that arrives after a newer request started (or after the property was invalidated) can be
//! recognised as stale and dropped:
//!
//! ```
//! use file_metadata::cache::MetadataCacheItem;
//! use file_metadata::provider::{MetadataItem, PropertyName};
//!
//! let mut item = MetadataCacheItem::new();
//! item.start_requests(1, &[PropertyName::Size]);
//! item.invalidate(2, Some(&[PropertyName::Size]));
//!
//! let mut late = MetadataItem::new();
//! late.set(PropertyName::Size, 10i64);
//! assert!(!item.store_properties(1, &late));
//! assert!(!item.has_fresh_cache(&[PropertyName::Size]));
//! ```

mod item;
mod set;

pub use item::{CachedProperty, MetadataCacheItem, PropertyState};
pub use set::{CacheUpdateEvent, MetadataCacheSet, UpdateListener};
