use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{MetadataResult, PropertyError};
use crate::provider::{
    extend_unique, FileEntry, MetadataItem, MetadataProvider, MetadataRequest, Property,
    PropertyName, PropertyValue,
};

/// The properties reported for one entry, or why they could not be read.
pub type EntryProperties = Result<HashMap<PropertyName, PropertyValue>, PropertyError>;

/// A backend that knows properties of entries on cloud and provided volumes.
pub trait EntryPropertiesService: Debug + Send + Sync {
    /// Look up `names` for every entry. Returns one result per entry, in order.
    fn get_entry_properties<'a>(
        &'a self,
        entries: &'a [FileEntry],
        names: &'a [PropertyName],
    ) -> BoxFuture<'a, MetadataResult<Vec<EntryProperties>>>;
}

/// Flags that read as `false` when the backend leaves them out.
const BOOLEAN_PROPERTIES: &[PropertyName] = &[
    PropertyName::AvailableOffline,
    PropertyName::AvailableWhenMetered,
    PropertyName::CanAddChildren,
    PropertyName::CanCopy,
    PropertyName::CanDelete,
    PropertyName::CanPin,
    PropertyName::CanRename,
    PropertyName::CanShare,
    PropertyName::Dirty,
    PropertyName::Hosted,
    PropertyName::IsExternalMedia,
    PropertyName::IsMachineRoot,
    PropertyName::Pinned,
    PropertyName::Present,
    PropertyName::Shared,
    PropertyName::SharedWithMe,
];

/// Supplies properties kept by an external backend, such as a cloud drive.
#[derive(Debug, Clone)]
pub struct ExternalMetadataProvider {
    service: Arc<dyn EntryPropertiesService>,
}

impl ExternalMetadataProvider {
    /// The properties supplied by this provider.
    pub const PROPERTY_NAMES: &'static [PropertyName] = &[
        PropertyName::AlternateUrl,
        PropertyName::AvailableOffline,
        PropertyName::AvailableWhenMetered,
        PropertyName::CanAddChildren,
        PropertyName::CanCopy,
        PropertyName::CanDelete,
        PropertyName::CanPin,
        PropertyName::CanRename,
        PropertyName::CanShare,
        PropertyName::CroppedThumbnailUrl,
        PropertyName::CustomIconUrl,
        PropertyName::Dirty,
        PropertyName::Hosted,
        PropertyName::ImageHeight,
        PropertyName::ImageRotation,
        PropertyName::ImageWidth,
        PropertyName::IsExternalMedia,
        PropertyName::IsMachineRoot,
        PropertyName::MediaMimeType,
        PropertyName::ModificationByMeTime,
        PropertyName::ModificationTime,
        PropertyName::Pinned,
        PropertyName::Present,
        PropertyName::ShareUrl,
        PropertyName::Shared,
        PropertyName::SharedWithMe,
        PropertyName::Size,
        PropertyName::ThumbnailUrl,
    ];

    /// Create a provider over `service`.
    pub fn new(service: Arc<dyn EntryPropertiesService>) -> Self {
        Self { service }
    }

    #[tracing::instrument(skip_all, fields(requests = requests.len()))]
    async fn get_all(&self, requests: Vec<MetadataRequest>) -> Vec<MetadataItem> {
        if requests.is_empty() {
            return Vec::new();
        }
        let entries: Vec<FileEntry> = requests.iter().map(|r| r.entry.clone()).collect();
        let mut names = Vec::new();
        for request in &requests {
            extend_unique(&mut names, &request.names);
        }

        match self.service.get_entry_properties(&entries, &names).await {
            Ok(results) => {
                let mut results = results.into_iter();
                requests
                    .iter()
                    .map(|request| match results.next() {
                        Some(Ok(properties)) => convert(&names, properties),
                        Some(Err(err)) => failed(&request.names, err),
                        None => {
                            tracing::warn!(url = %request.entry.url, "no properties reported");
                            failed(&request.names, PropertyError::new("no properties reported"))
                        }
                    })
                    .collect()
            }
            Err(e) => {
                tracing::debug!(error = %e, "entry properties lookup failed");
                let err = PropertyError::from(e);
                requests
                    .iter()
                    .map(|request| failed(&request.names, err.clone()))
                    .collect()
            }
        }
    }
}

fn convert(
    names: &[PropertyName],
    mut properties: HashMap<PropertyName, PropertyValue>,
) -> MetadataItem {
    let mut item = MetadataItem::new();
    for name in names {
        match properties.remove(name) {
            Some(value) => item.set(*name, value),
            None if BOOLEAN_PROPERTIES.contains(name) => item.set(*name, false),
            None => item.set_optional::<PropertyValue>(*name, None),
        }
    }
    for (name, value) in properties {
        item.set(name, value);
    }
    item
}

fn failed(names: &[PropertyName], err: PropertyError) -> MetadataItem {
    names
        .iter()
        .map(|name| (*name, Property::Failed(err.clone())))
        .collect()
}

impl MetadataProvider for ExternalMetadataProvider {
    fn property_names(&self) -> &[PropertyName] {
        Self::PROPERTY_NAMES
    }

    fn get(&self, requests: Vec<MetadataRequest>) -> BoxFuture<'_, Vec<MetadataItem>> {
        self.get_all(requests).boxed()
    }
}
