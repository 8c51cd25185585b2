use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::cache::MetadataCacheItem;
use crate::provider::{FileEntry, MetadataItem, MetadataRequest, PropertyName};

/// Raised by [`MetadataCacheSet::store_properties`] when at least one entry changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdateEvent {
    /// The entries whose cache changed.
    pub entries: Vec<FileEntry>,
    /// The same entries, by URL.
    pub entries_by_url: HashMap<String, FileEntry>,
    /// The property names that were part of the store.
    pub changed_property_names: BTreeSet<PropertyName>,
}

/// Callback invoked with every [`CacheUpdateEvent`].
pub type UpdateListener = Arc<dyn Fn(&CacheUpdateEvent) + Send + Sync>;

/// Cached metadata for many files, keyed by URL.
pub struct MetadataCacheSet {
    items: HashMap<String, MetadataCacheItem>,
    request_id_counter: u64,
    listeners: Vec<UpdateListener>,
}

impl Debug for MetadataCacheSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCacheSet")
            .field("items", &self.items)
            .field("request_id_counter", &self.request_id_counter)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for MetadataCacheSet {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            request_id_counter: 1,
            listeners: Vec::new(),
        }
    }
}

impl MetadataCacheSet {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id. Ids start at 1 and strictly increase.
    pub fn generate_request_id(&mut self) -> u64 {
        let id = self.request_id_counter;
        self.request_id_counter += 1;
        id
    }

    /// Build one request per entry that still needs some of `names`.
    pub fn create_requests(
        &self,
        entries: &[FileEntry],
        names: &[PropertyName],
    ) -> Vec<MetadataRequest> {
        entries
            .iter()
            .filter_map(|entry| {
                let needed = match self.items.get(&entry.url) {
                    Some(item) => item.create_requests(names),
                    None => MetadataCacheItem::new().create_requests(names),
                };
                (!needed.is_empty()).then(|| MetadataRequest::new(entry.clone(), needed))
            })
            .collect()
    }

    /// Mark the properties of `requests` as loading under `request_id`.
    pub fn start_requests(&mut self, request_id: u64, requests: &[MetadataRequest]) {
        for request in requests {
            self.items
                .entry(request.entry.url.clone())
                .or_default()
                .start_requests(request_id, &request.names);
        }
    }

    /// Store `results[i]` for `entries[i]`.
    ///
    /// Entries that are not cached (never started, or cleared since) are ignored. Listeners
    /// are notified, and the event returned, only if some entry changed.
    pub fn store_properties(
        &mut self,
        request_id: u64,
        entries: &[FileEntry],
        results: &[MetadataItem],
        names: &[PropertyName],
    ) -> Option<CacheUpdateEvent> {
        let mut changed = Vec::new();
        let mut entries_by_url = HashMap::new();
        for (entry, result) in entries.iter().zip(results) {
            let Some(item) = self.items.get_mut(&entry.url) else {
                continue;
            };
            if item.store_properties(request_id, result) {
                changed.push(entry.clone());
                entries_by_url.insert(entry.url.clone(), entry.clone());
            }
        }
        if changed.is_empty() {
            return None;
        }

        let event = CacheUpdateEvent {
            entries: changed,
            entries_by_url,
            changed_property_names: names.iter().copied().collect(),
        };
        for listener in &self.listeners {
            listener(&event);
        }
        Some(event)
    }

    /// Invalidate `names` (or everything) on the cached `entries`.
    pub fn invalidate(
        &mut self,
        request_id: u64,
        entries: &[FileEntry],
        names: Option<&[PropertyName]>,
    ) {
        for entry in entries {
            if let Some(item) = self.items.get_mut(&entry.url) {
                item.invalidate(request_id, names);
            }
        }
    }

    /// Cached values of `names` for each entry. Uncached entries give empty items.
    pub fn get(&self, entries: &[FileEntry], names: &[PropertyName]) -> Vec<MetadataItem> {
        entries
            .iter()
            .map(|entry| self.get_url(&entry.url, names))
            .collect()
    }

    /// Like [`MetadataCacheSet::get`], keyed by URL.
    pub fn get_by_urls<S: AsRef<str>>(&self, urls: &[S], names: &[PropertyName]) -> Vec<MetadataItem> {
        urls.iter()
            .map(|url| self.get_url(url.as_ref(), names))
            .collect()
    }

    fn get_url(&self, url: &str, names: &[PropertyName]) -> MetadataItem {
        self.items
            .get(url)
            .map(|item| item.get(names))
            .unwrap_or_default()
    }

    /// A copy of the cached items of `entries`, without listeners.
    ///
    /// Later changes to either set do not affect the other.
    pub fn create_snapshot(&self, entries: &[FileEntry]) -> MetadataCacheSet {
        let mut snapshot = MetadataCacheSet::new();
        for entry in entries {
            if let Some(item) = self.items.get(&entry.url) {
                snapshot.items.insert(entry.url.clone(), item.clone());
            }
        }
        snapshot
    }

    /// Evict the entries at `urls`.
    pub fn clear<S: AsRef<str>>(&mut self, urls: &[S]) {
        for url in urls {
            self.items.remove(url.as_ref());
        }
    }

    /// Evict everything.
    pub fn clear_all(&mut self) {
        self.items.clear();
    }

    /// Whether every entry has `names` cached and fulfilled. True when `names` is empty.
    pub fn has_fresh_cache(&self, entries: &[FileEntry], names: &[PropertyName]) -> bool {
        if names.is_empty() {
            return true;
        }
        entries.iter().all(|entry| {
            self.items
                .get(&entry.url)
                .is_some_and(|item| item.has_fresh_cache(names))
        })
    }

    /// Register a callback for update events.
    pub fn add_update_listener(&mut self, listener: UpdateListener) {
        self.listeners.push(listener);
    }

    /// The cached item for `url`.
    pub fn item(&self, url: &str) -> Option<&MetadataCacheItem> {
        self.items.get(url)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::provider::{Property, PropertyValue};

    use PropertyName::{ImageHeight, ImageWidth};

    fn dims(width: u32, height: u32) -> MetadataItem {
        let mut item = MetadataItem::new();
        item.set(ImageWidth, width);
        item.set(ImageHeight, height);
        item
    }

    #[test]
    fn test_request_ids_increase() {
        let mut set = MetadataCacheSet::new();
        assert_eq!(set.generate_request_id(), 1);
        assert_eq!(set.generate_request_id(), 2);
        assert_eq!(set.generate_request_id(), 3);
    }

    #[test]
    fn test_requests_skip_cached_entries() {
        let mut set = MetadataCacheSet::new();
        let a = FileEntry::file("file:///a.png");
        let b = FileEntry::file("file:///b.png");
        let entries = [a.clone(), b.clone()];

        let requests = set.create_requests(&entries, &[ImageWidth, ImageHeight]);
        assert_eq!(requests.len(), 2);

        let id = set.generate_request_id();
        set.start_requests(id, &requests[..1]);
        set.store_properties(id, &[a.clone()], &[dims(1, 2)], &[ImageWidth, ImageHeight]);

        let requests = set.create_requests(&entries, &[ImageWidth, ImageHeight]);
        assert_eq!(requests, vec![MetadataRequest::new(b, vec![ImageWidth, ImageHeight])]);
        assert!(set.has_fresh_cache(&[a.clone()], &[ImageWidth]));
        assert!(!set.has_fresh_cache(&entries, &[ImageWidth]));
        assert!(set.has_fresh_cache(&entries, &[]));
    }

    #[test]
    fn test_update_event() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut set = MetadataCacheSet::new();
        let sink = events.clone();
        set.add_update_listener(Arc::new(move |event: &CacheUpdateEvent| {
            sink.lock().push(event.clone())
        }));

        let a = FileEntry::file("file:///a.png");
        let b = FileEntry::file("file:///b.png");
        let id = set.generate_request_id();
        set.start_requests(id, &set.create_requests(&[a.clone()], &[ImageWidth]));

        // b was never started, so only a changes.
        let event = set
            .store_properties(id, &[a.clone(), b], &[dims(4, 5), dims(6, 7)], &[ImageWidth])
            .unwrap();
        assert_eq!(event.entries, vec![a.clone()]);
        assert!(event.entries_by_url.contains_key("file:///a.png"));
        assert_eq!(event.changed_property_names, BTreeSet::from([ImageWidth]));
        assert_eq!(events.lock().len(), 1);

        // Nothing changes the second time, so no event.
        assert!(set.store_properties(id, &[a], &[dims(4, 5)], &[ImageWidth]).is_none());
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_snapshot_and_clear() {
        let mut set = MetadataCacheSet::new();
        let a = FileEntry::file("file:///a.png");
        let id = set.generate_request_id();
        set.start_requests(id, &set.create_requests(&[a.clone()], &[ImageWidth]));
        let snapshot = set.create_snapshot(&[a.clone(), FileEntry::file("file:///other")]);
        assert_eq!(snapshot.len(), 1);

        set.clear(&["file:///a.png"]);
        assert!(set.is_empty());
        assert!(set.get(&[a.clone()], &[ImageWidth])[0].is_empty());
        assert_eq!(
            snapshot.get_by_urls(&["file:///a.png"], &[ImageWidth])[0].get(ImageWidth),
            Some(&Property::Pending)
        );

        // A late result for a cleared entry is dropped.
        assert!(set.store_properties(id, &[a], &[dims(1, 1)], &[ImageWidth]).is_none());
    }

    #[test]
    fn test_invalidate_keeps_stale_values() {
        let mut set = MetadataCacheSet::new();
        let a = FileEntry::file("file:///a.png");
        let id = set.generate_request_id();
        set.start_requests(id, &set.create_requests(&[a.clone()], &[ImageWidth]));
        set.store_properties(id, &[a.clone()], &[dims(8, 9)], &[ImageWidth]);

        let id = set.generate_request_id();
        set.invalidate(id, &[a.clone()], None);
        assert!(!set.has_fresh_cache(&[a.clone()], &[ImageWidth]));
        assert_eq!(
            set.get(&[a.clone()], &[ImageWidth])[0].value(ImageWidth),
            Some(&PropertyValue::Integer(8))
        );

        set.clear_all();
        assert!(set.item(&a.url).is_none());
    }
}
