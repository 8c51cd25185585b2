use std::fmt::Debug;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::{join_all, BoxFuture, FutureExt};

use crate::dispatcher::local_path;
use crate::error::{MetadataResult, PropertyError};
use crate::provider::{FileEntry, MetadataItem, MetadataProvider, MetadataRequest, PropertyName};

/// What the file system reports about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystemMetadata {
    /// Last modification time.
    pub modification_time: SystemTime,
    /// Size in bytes.
    pub size: u64,
}

/// Stats entries on the underlying file system.
pub trait FileSystemService: Debug + Send + Sync {
    /// Stat `entry`.
    fn get_metadata<'a>(
        &'a self,
        entry: &'a FileEntry,
    ) -> BoxFuture<'a, MetadataResult<FileSystemMetadata>>;
}

/// Stats local files with [`tokio::fs::metadata`], for `file://` URLs and plain paths.
///
/// URLs are percent-decoded with [`local_path`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystemService for LocalFileSystem {
    fn get_metadata<'a>(
        &'a self,
        entry: &'a FileEntry,
    ) -> BoxFuture<'a, MetadataResult<FileSystemMetadata>> {
        async move {
            let metadata = tokio::fs::metadata(local_path(&entry.url)?).await?;
            Ok(FileSystemMetadata {
                modification_time: metadata.modified()?,
                size: metadata.len(),
            })
        }
        .boxed()
    }
}

/// Supplies `modificationTime`, `size`, `present` and `availableOffline` from the file system.
#[derive(Debug, Clone)]
pub struct FileSystemMetadataProvider {
    service: Arc<dyn FileSystemService>,
}

impl FileSystemMetadataProvider {
    /// The properties supplied by this provider.
    pub const PROPERTY_NAMES: &'static [PropertyName] = &[
        PropertyName::ModificationTime,
        PropertyName::Size,
        PropertyName::Present,
        PropertyName::AvailableOffline,
    ];

    /// Create a provider over `service`.
    pub fn new(service: Arc<dyn FileSystemService>) -> Self {
        Self { service }
    }

    async fn get_one(&self, request: MetadataRequest) -> MetadataItem {
        let mut item = MetadataItem::new();
        let wants = |name: PropertyName| request.names.contains(&name);

        if wants(PropertyName::ModificationTime) || wants(PropertyName::Size) {
            match self.service.get_metadata(&request.entry).await {
                Ok(metadata) => {
                    if wants(PropertyName::ModificationTime) {
                        item.set(PropertyName::ModificationTime, metadata.modification_time);
                    }
                    if wants(PropertyName::Size) {
                        let size = if request.entry.is_directory {
                            -1
                        } else {
                            metadata.size as i64
                        };
                        item.set(PropertyName::Size, size);
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %request.entry.url, error = %e, "stat failed");
                    let error = PropertyError::from(e);
                    item.set_error(PropertyName::ModificationTime, error.clone());
                    item.set_error(PropertyName::Size, error);
                    return item;
                }
            }
        }

        // Entries on a local file system are always present and available offline.
        if wants(PropertyName::Present) {
            item.set(PropertyName::Present, true);
        }
        if wants(PropertyName::AvailableOffline) {
            item.set(PropertyName::AvailableOffline, true);
        }
        item
    }
}

impl Default for FileSystemMetadataProvider {
    fn default() -> Self {
        Self::new(Arc::new(LocalFileSystem))
    }
}

impl MetadataProvider for FileSystemMetadataProvider {
    fn property_names(&self) -> &[PropertyName] {
        Self::PROPERTY_NAMES
    }

    fn get(&self, requests: Vec<MetadataRequest>) -> BoxFuture<'_, Vec<MetadataItem>> {
        join_all(requests.into_iter().map(|request| self.get_one(request))).boxed()
    }
}
