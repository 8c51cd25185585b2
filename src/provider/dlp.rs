use std::fmt::Debug;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::MetadataResult;
use crate::provider::{FileEntry, MetadataItem, MetadataProvider, MetadataRequest, PropertyName};

/// Data leak prevention state of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlpProperties {
    /// Whether any policy restricts the file.
    pub is_dlp_restricted: bool,
    /// Where the file was downloaded from.
    pub source_url: String,
    /// Whether the file may not be copied to the current destination.
    pub is_restricted_for_destination: bool,
}

/// Looks up data leak prevention state.
pub trait DlpService: Debug + Send + Sync {
    /// Returns one result per entry, in order.
    fn get_dlp_metadata<'a>(
        &'a self,
        entries: &'a [FileEntry],
    ) -> BoxFuture<'a, MetadataResult<Vec<DlpProperties>>>;
}

/// Supplies data leak prevention properties.
#[derive(Debug, Clone)]
pub struct DlpMetadataProvider {
    service: Arc<dyn DlpService>,
}

impl DlpMetadataProvider {
    /// The properties supplied by this provider.
    pub const PROPERTY_NAMES: &'static [PropertyName] = &[
        PropertyName::IsDlpRestricted,
        PropertyName::SourceUrl,
        PropertyName::IsRestrictedForDestination,
    ];

    /// Create a provider over `service`.
    pub fn new(service: Arc<dyn DlpService>) -> Self {
        Self { service }
    }

    async fn get_all(&self, requests: Vec<MetadataRequest>) -> Vec<MetadataItem> {
        if requests.is_empty() {
            return Vec::new();
        }
        let entries: Vec<FileEntry> = requests.into_iter().map(|r| r.entry).collect();
        let empty = |count| vec![MetadataItem::new(); count];

        // Without an answer the items stay empty; the model reads those as "no value".
        let properties = match self.service.get_dlp_metadata(&entries).await {
            Ok(properties) => properties,
            Err(e) => {
                tracing::warn!(error = %e, "dlp metadata lookup failed");
                return empty(entries.len());
            }
        };
        if properties.len() != entries.len() {
            tracing::warn!(
                expected = entries.len(),
                got = properties.len(),
                "dlp metadata count mismatch"
            );
            return empty(entries.len());
        }

        properties
            .into_iter()
            .map(|dlp| {
                let mut item = MetadataItem::new();
                item.set(PropertyName::IsDlpRestricted, dlp.is_dlp_restricted);
                item.set(PropertyName::SourceUrl, dlp.source_url);
                item.set(
                    PropertyName::IsRestrictedForDestination,
                    dlp.is_restricted_for_destination,
                );
                item
            })
            .collect()
    }
}

impl MetadataProvider for DlpMetadataProvider {
    fn property_names(&self) -> &[PropertyName] {
        Self::PROPERTY_NAMES
    }

    fn get(&self, requests: Vec<MetadataRequest>) -> BoxFuture<'_, Vec<MetadataItem>> {
        self.get_all(requests).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use crate::provider::PropertyValue;

    #[derive(Debug)]
    struct FixedDlp(Option<usize>);

    impl DlpService for FixedDlp {
        fn get_dlp_metadata<'a>(
            &'a self,
            _entries: &'a [FileEntry],
        ) -> BoxFuture<'a, MetadataResult<Vec<DlpProperties>>> {
            let result = match self.0 {
                Some(count) => Ok(vec![
                    DlpProperties {
                        is_dlp_restricted: true,
                        source_url: "https://example.com/a".to_string(),
                        is_restricted_for_destination: false,
                    };
                    count
                ]),
                None => Err(MetadataError::General("unavailable".to_string())),
            };
            async move { result }.boxed()
        }
    }

    fn requests(count: usize) -> Vec<MetadataRequest> {
        (0..count)
            .map(|i| {
                MetadataRequest::new(
                    FileEntry::file(format!("file:///{i}")),
                    DlpMetadataProvider::PROPERTY_NAMES.to_vec(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dlp_provider() {
        let items = DlpMetadataProvider::new(Arc::new(FixedDlp(Some(2))))
            .get(requests(2))
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].value(PropertyName::IsDlpRestricted), Some(&PropertyValue::Bool(true)));
        assert_eq!(
            items[1].value(PropertyName::SourceUrl).and_then(PropertyValue::as_str),
            Some("https://example.com/a")
        );

        for service in [FixedDlp(None), FixedDlp(Some(1))] {
            let items = DlpMetadataProvider::new(Arc::new(service)).get(requests(2)).await;
            assert_eq!(items, vec![MetadataItem::new(); 2]);
        }
    }
}
