//! The metadata model: a cache in front of a [`MetadataProvider`].
//!
//! ```ignore
//! let model = MetadataModel::new(Arc::new(provider));
//! let items = model
//!     .get(&[FileEntry::file("file:///photo.jpg")], &[PropertyName::ImageWidth])
//!     .await?;
//! ```

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cache::{CacheUpdateEvent, MetadataCacheSet, UpdateListener};
use crate::error::{MetadataError, MetadataResult};
use crate::provider::{
    extend_unique, FileEntry, MetadataItem, MetadataProvider, MetadataRequest, Property,
    PropertyName,
};

/// A caller of [`MetadataModel::get`] waiting for its properties.
struct PendingCallback {
    entries: Vec<FileEntry>,
    names: Vec<PropertyName>,
    /// The cache as this caller saw it, updated with every result since.
    snapshot: MetadataCacheSet,
    sender: oneshot::Sender<Vec<MetadataItem>>,
}

impl PendingCallback {
    /// Store a result into the snapshot. Returns the answer once every name is fulfilled.
    fn store_properties(
        &mut self,
        request_id: u64,
        entries: &[FileEntry],
        results: &[MetadataItem],
    ) -> Option<Vec<MetadataItem>> {
        self.snapshot
            .store_properties(request_id, entries, results, &self.names);
        self.snapshot
            .has_fresh_cache(&self.entries, &self.names)
            .then(|| self.snapshot.get(&self.entries, &self.names))
    }
}

#[derive(Default)]
struct ModelState {
    cache: MetadataCacheSet,
    callbacks: Vec<PendingCallback>,
}

/// Caches properties fetched from a provider and answers repeated requests from the cache.
///
/// Requests for properties that are already being fetched wait for the running fetch instead
/// of starting another. Results that arrive after their entries were invalidated or evicted
/// are dropped from the cache (the caller that asked for them still receives them).
///
/// The provider is called from within [`MetadataModel::get`]. Dropping that future before it
/// completes leaves the requested properties loading until they are invalidated.
pub struct MetadataModel {
    provider: Arc<dyn MetadataProvider>,
    state: Mutex<ModelState>,
    listeners: Mutex<Vec<UpdateListener>>,
}

impl Debug for MetadataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MetadataModel")
            .field("provider", &self.provider)
            .field("cache", &state.cache)
            .field("pending_callbacks", &state.callbacks.len())
            .finish()
    }
}

impl MetadataModel {
    /// Create a model with an empty cache.
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(ModelState::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.provider
    }

    /// Get `names` for every entry, fetching what is not cached.
    ///
    /// Fails only if a name is not supplied by the provider; fetch errors are reported per
    /// property.
    #[tracing::instrument(skip_all, fields(entries = entries.len(), names = names.len()))]
    pub async fn get(
        &self,
        entries: &[FileEntry],
        names: &[PropertyName],
    ) -> MetadataResult<Vec<MetadataItem>> {
        self.provider.check_property_names(names)?;

        let (request_id, requests, receiver) = {
            let mut state = self.state.lock();
            if state.cache.has_fresh_cache(entries, names) {
                return Ok(state.cache.get(entries, names));
            }

            let request_id = state.cache.generate_request_id();
            let mut snapshot = state.cache.create_snapshot(entries);
            let requests = snapshot.create_requests(entries, names);
            snapshot.start_requests(request_id, &requests);
            state.cache.start_requests(request_id, &requests);

            let (sender, receiver) = oneshot::channel();
            state.callbacks.push(PendingCallback {
                entries: entries.to_vec(),
                names: names.to_vec(),
                snapshot,
                sender,
            });
            (request_id, requests, receiver)
        };

        if !requests.is_empty() {
            tracing::debug!(request_id, requests = requests.len(), "fetching metadata");
            let results = self.provider.get(requests.clone()).await;
            self.store_results(request_id, &requests, results, names);
        }

        receiver
            .await
            .map_err(|_| MetadataError::General("metadata request was dropped".to_string()))
    }

    fn store_results(
        &self,
        request_id: u64,
        requests: &[MetadataRequest],
        mut results: Vec<MetadataItem>,
        names: &[PropertyName],
    ) {
        if results.len() != requests.len() {
            tracing::warn!(
                expected = requests.len(),
                got = results.len(),
                "provider returned the wrong number of items"
            );
            results.resize_with(requests.len(), MetadataItem::new);
        }
        // A requested name missing from a result was asked for but has no value.
        for (request, result) in requests.iter().zip(results.iter_mut()) {
            for name in &request.names {
                if !result.contains(*name) {
                    result.insert(*name, Property::Fulfilled(None));
                }
            }
        }
        let entries: Vec<FileEntry> = requests.iter().map(|r| r.entry.clone()).collect();

        let (event, answered) = {
            let mut state = self.state.lock();
            let event = state
                .cache
                .store_properties(request_id, &entries, &results, names);

            let mut answered = Vec::new();
            let mut i = 0;
            while i < state.callbacks.len() {
                match state.callbacks[i].store_properties(request_id, &entries, &results) {
                    Some(items) => answered.push((state.callbacks.swap_remove(i), items)),
                    None => i += 1,
                }
            }
            (event, answered)
        };

        for (callback, items) in answered {
            // The caller may have stopped waiting.
            let _ = callback.sender.send(items);
        }
        if let Some(event) = event {
            self.dispatch(&event);
        }
    }

    /// The cached values of `names`, without fetching.
    pub fn get_cache(
        &self,
        entries: &[FileEntry],
        names: &[PropertyName],
    ) -> MetadataResult<Vec<MetadataItem>> {
        self.provider.check_property_names(names)?;
        Ok(self.state.lock().cache.get(entries, names))
    }

    /// Replace the cached properties of `entries` with known values.
    ///
    /// `values[i]` holds the new properties of `entries[i]`. Other cached properties of the
    /// entries are invalidated.
    pub fn update(&self, entries: &[FileEntry], values: Vec<MetadataItem>) {
        let event = {
            let mut state = self.state.lock();
            let invalidate_id = state.cache.generate_request_id();
            state.cache.invalidate(invalidate_id, entries, None);

            let request_id = state.cache.generate_request_id();
            let mut names = Vec::new();
            let requests: Vec<MetadataRequest> = entries
                .iter()
                .zip(&values)
                .map(|(entry, item)| {
                    let item_names: Vec<PropertyName> = item.names().collect();
                    extend_unique(&mut names, &item_names);
                    MetadataRequest::new(entry.clone(), item_names)
                })
                .collect();
            state.cache.start_requests(request_id, &requests);
            state
                .cache
                .store_properties(request_id, entries, &values, &names)
        };
        if let Some(event) = event {
            self.dispatch(&event);
        }
    }

    /// Forget anything cached for newly created entries.
    pub fn notify_entries_created(&self, entries: &[FileEntry]) {
        let urls: Vec<&str> = entries.iter().map(|entry| entry.url.as_str()).collect();
        self.state.lock().cache.clear(&urls);
    }

    /// Forget anything cached for the removed entries at `urls`.
    pub fn notify_entries_removed<S: AsRef<str>>(&self, urls: &[S]) {
        self.state.lock().cache.clear(urls);
    }

    /// Invalidate the cached properties of changed entries. Stale values stay readable
    /// through [`MetadataModel::get_cache`].
    pub fn notify_entries_changed(&self, entries: &[FileEntry]) {
        let mut state = self.state.lock();
        let request_id = state.cache.generate_request_id();
        state.cache.invalidate(request_id, entries, None);
    }

    /// Evict everything.
    pub fn clear_all_cache(&self) {
        self.state.lock().cache.clear_all();
    }

    /// Register a callback for cache updates.
    pub fn add_update_listener(&self, listener: UpdateListener) {
        self.listeners.lock().push(listener);
    }

    fn dispatch(&self, event: &CacheUpdateEvent) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }
}
