use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::provider::{
    extend_unique, MetadataItem, MetadataProvider, MetadataRequest, PropertyName, PropertyValue,
    VolumeType,
};

/// What external backends of documents-provider volumes report reliably.
const DOCUMENTS_PROVIDER_PROPERTY_NAMES: &[PropertyName] = &[
    PropertyName::Size,
    PropertyName::ModificationTime,
    PropertyName::CanCopy,
    PropertyName::CanDelete,
    PropertyName::CanRename,
    PropertyName::CanAddChildren,
];

/// Splits requests across the file system, external, content and DLP providers and merges
/// their answers.
///
/// Entries on cloud and provided volumes get their properties from the external provider.
/// Properties that the content provider also supplies are corroborated by parsing the file,
/// but only for entries the external provider reports as `present`.
#[derive(Debug, Clone)]
pub struct MultiMetadataProvider {
    file_system: Arc<dyn MetadataProvider>,
    external: Arc<dyn MetadataProvider>,
    content: Arc<dyn MetadataProvider>,
    dlp: Arc<dyn MetadataProvider>,
    property_names: Vec<PropertyName>,
}

#[derive(Debug, Default)]
struct Batches {
    file_system: Vec<MetadataRequest>,
    external: Vec<MetadataRequest>,
    content: Vec<MetadataRequest>,
    fallback_content: Vec<MetadataRequest>,
    dlp: Vec<MetadataRequest>,
}

fn add_request(
    list: &mut Vec<MetadataRequest>,
    request: &MetadataRequest,
    names: Vec<PropertyName>,
) {
    if !names.is_empty() {
        list.push(MetadataRequest::new(request.entry.clone(), names));
    }
}

impl MultiMetadataProvider {
    /// Combine the four providers.
    pub fn new(
        file_system: Arc<dyn MetadataProvider>,
        external: Arc<dyn MetadataProvider>,
        content: Arc<dyn MetadataProvider>,
        dlp: Arc<dyn MetadataProvider>,
    ) -> Self {
        let mut property_names = Vec::new();
        for provider in [&file_system, &external, &content, &dlp] {
            extend_unique(&mut property_names, provider.property_names());
        }
        Self {
            file_system,
            external,
            content,
            dlp,
            property_names,
        }
    }

    fn split(&self, requests: &[MetadataRequest]) -> Batches {
        let mut batches = Batches::default();
        for request in requests {
            let mut file_system = Vec::new();
            let mut external = Vec::new();
            let mut content = Vec::new();
            let mut fallback_content = Vec::new();
            let mut dlp = Vec::new();

            for name in &request.names {
                let is_external = self.external.property_names().contains(name);
                if self.file_system.property_names().contains(name) {
                    file_system.push(*name);
                }
                if is_external {
                    external.push(*name);
                }
                if self.content.property_names().contains(name) {
                    if is_external {
                        fallback_content.push(*name);
                    } else {
                        content.push(*name);
                    }
                }
                if self.dlp.property_names().contains(name) {
                    dlp.push(*name);
                }
            }

            match request.entry.volume_type {
                Some(VolumeType::Drive | VolumeType::Provided) => {
                    // Synced properties may lag behind the file; `present` tells whether the
                    // content can be read to check them.
                    if !fallback_content.is_empty() {
                        extend_unique(&mut external, &[PropertyName::Present]);
                    }
                    add_request(&mut batches.external, request, external);
                    add_request(&mut batches.content, request, content);
                    add_request(&mut batches.fallback_content, request, fallback_content);
                }
                Some(VolumeType::DocumentsProvider) => {
                    external.retain(|name| DOCUMENTS_PROVIDER_PROPERTY_NAMES.contains(name));
                    add_request(&mut batches.external, request, external);
                }
                _ => {
                    add_request(&mut batches.file_system, request, file_system);
                    content.extend(fallback_content);
                    add_request(&mut batches.content, request, content);
                }
            }
            add_request(&mut batches.dlp, request, dlp);
        }
        batches
    }

    #[tracing::instrument(skip_all, fields(requests = requests.len()))]
    async fn get_all(&self, requests: Vec<MetadataRequest>) -> Vec<MetadataItem> {
        let Batches {
            file_system,
            external,
            content,
            fallback_content,
            dlp,
        } = self.split(&requests);
        tracing::trace!(
            file_system = file_system.len(),
            external = external.len(),
            content = content.len(),
            fallback_content = fallback_content.len(),
            dlp = dlp.len(),
            "split metadata requests"
        );

        let external_and_fallback = async {
            let external = batch(self.external.as_ref(), external).await;
            let fallback_content = {
                let present: HashSet<&str> = external
                    .iter()
                    .filter(|(_, item)| {
                        item.value(PropertyName::Present)
                            .and_then(PropertyValue::as_bool)
                            .unwrap_or(false)
                    })
                    .map(|(url, _)| url.as_str())
                    .collect();
                fallback_content
                    .into_iter()
                    .filter(|request| present.contains(request.entry.url.as_str()))
                    .collect()
            };
            let fallback = batch(self.content.as_ref(), fallback_content).await;
            (external, fallback)
        };

        let (file_system, (external, fallback), content, dlp) = futures::join!(
            batch(self.file_system.as_ref(), file_system),
            external_and_fallback,
            batch(self.content.as_ref(), content),
            batch(self.dlp.as_ref(), dlp),
        );

        let mut merged: HashMap<String, MetadataItem> = HashMap::new();
        for results in [file_system, external, content, fallback, dlp] {
            for (url, item) in results {
                merged.entry(url).or_default().merge(item);
            }
        }
        requests
            .iter()
            .map(|request| merged.get(&request.entry.url).cloned().unwrap_or_default())
            .collect()
    }
}

/// Run one provider batch, pairing each result with its entry's URL.
async fn batch(
    provider: &dyn MetadataProvider,
    requests: Vec<MetadataRequest>,
) -> Vec<(String, MetadataItem)> {
    if requests.is_empty() {
        return Vec::new();
    }
    let urls: Vec<String> = requests.iter().map(|r| r.entry.url.clone()).collect();
    let results = provider.get(requests).await;
    if results.len() != urls.len() {
        tracing::warn!(
            provider = ?provider,
            expected = urls.len(),
            got = results.len(),
            "provider returned the wrong number of items"
        );
    }
    urls.into_iter().zip(results).collect()
}

impl MetadataProvider for MultiMetadataProvider {
    fn property_names(&self) -> &[PropertyName] {
        &self.property_names
    }

    fn get(&self, requests: Vec<MetadataRequest>) -> BoxFuture<'_, Vec<MetadataItem>> {
        self.get_all(requests).boxed()
    }
}
