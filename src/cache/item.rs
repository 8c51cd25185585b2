use std::collections::BTreeMap;

use crate::error::PropertyError;
use crate::provider::{MetadataItem, Property, PropertyName, PropertyValue};

/// Where a cached property is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyState {
    /// Needs to be (re)fetched. A stale value may still be held.
    Invalidated,
    /// A request for it is in flight.
    Loading,
    /// Answered and up to date.
    Fulfilled,
}

/// One cached property.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedProperty {
    /// The last stored value.
    pub value: Option<PropertyValue>,
    /// The last stored error.
    pub error: Option<PropertyError>,
    /// Id of the request that last touched the property. `0` if never stamped.
    pub request_id: u64,
    /// Current state.
    pub state: PropertyState,
    answered: bool,
}

impl Default for CachedProperty {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
            request_id: 0,
            state: PropertyState::Invalidated,
            answered: false,
        }
    }
}

impl CachedProperty {
    fn to_property(&self) -> Property {
        if let Some(err) = &self.error {
            Property::Failed(err.clone())
        } else if self.answered || self.value.is_some() {
            Property::Fulfilled(self.value.clone())
        } else {
            Property::Pending
        }
    }
}

/// The cached properties of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataCacheItem {
    properties: BTreeMap<PropertyName, CachedProperty>,
}

impl MetadataCacheItem {
    /// An empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// The names among `names` that need to be fetched.
    ///
    /// Properties that are loading or fulfilled are left out, so callers asking for a property
    /// while it is in flight share the pending request.
    pub fn create_requests(&self, names: &[PropertyName]) -> Vec<PropertyName> {
        let mut requested = Vec::new();
        for name in names {
            let needed = self
                .properties
                .get(name)
                .map_or(true, |property| property.state == PropertyState::Invalidated);
            if needed && !requested.contains(name) {
                requested.push(*name);
            }
        }
        requested
    }

    /// Mark `names` as loading under `request_id`.
    pub fn start_requests(&mut self, request_id: u64, names: &[PropertyName]) {
        for name in names {
            let property = self.properties.entry(*name).or_default();
            property.request_id = request_id;
            property.state = PropertyState::Loading;
        }
    }

    /// Store the answer of request `request_id`. Returns whether anything changed.
    ///
    /// A property is skipped if a newer request has already touched it, or if it is already
    /// fulfilled.
    pub fn store_properties(&mut self, request_id: u64, item: &MetadataItem) -> bool {
        let mut changed = false;
        for (name, answer) in item.iter() {
            let (value, error) = match answer {
                Property::Pending => continue,
                Property::Fulfilled(value) => (value.clone(), None),
                Property::Failed(err) => (None, Some(err.clone())),
            };
            let property = self.properties.entry(name).or_default();
            if request_id < property.request_id || property.state == PropertyState::Fulfilled {
                tracing::trace!(%name, request_id, stored = property.request_id, "dropping stale result");
                continue;
            }
            property.value = value;
            property.error = error;
            property.request_id = request_id;
            property.state = PropertyState::Fulfilled;
            property.answered = true;
            changed = true;
        }
        changed
    }

    /// Invalidate `names`, or every cached property when `names` is `None`.
    ///
    /// # Panics
    ///
    /// If `request_id` is not newer than the id stored on one of the properties.
    pub fn invalidate(&mut self, request_id: u64, names: Option<&[PropertyName]>) {
        let invalidate = |property: &mut CachedProperty| {
            assert!(
                property.request_id < request_id,
                "invalidation with request id {request_id} is not newer than {}",
                property.request_id
            );
            property.request_id = request_id;
            property.state = PropertyState::Invalidated;
        };
        match names {
            Some(names) => {
                for name in names {
                    if let Some(property) = self.properties.get_mut(name) {
                        invalidate(property);
                    }
                }
            }
            None => self.properties.values_mut().for_each(invalidate),
        }
    }

    /// What is cached for `names`, including stale values. Names never cached are left out.
    pub fn get(&self, names: &[PropertyName]) -> MetadataItem {
        names
            .iter()
            .filter_map(|name| {
                self.properties
                    .get(name)
                    .map(|property| (*name, property.to_property()))
            })
            .collect()
    }

    /// Whether every one of `names` is cached and fulfilled.
    pub fn has_fresh_cache(&self, names: &[PropertyName]) -> bool {
        names.iter().all(|name| {
            self.properties
                .get(name)
                .is_some_and(|property| property.state == PropertyState::Fulfilled)
        })
    }

    /// The raw cached property.
    pub fn property(&self, name: PropertyName) -> Option<&CachedProperty> {
        self.properties.get(&name)
    }
}
