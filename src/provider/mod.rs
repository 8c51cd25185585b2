//! Metadata providers and the property types they exchange with the cache.
//!
//! A provider answers a batch of [`MetadataRequest`]s with exactly one [`MetadataItem`] per
//! request, in order. Providers never fail a batch: anything that goes wrong is recorded as a
//! [`Property::Failed`] on the affected properties.

mod content;
mod dlp;
mod external;
mod file_system;
mod multi;

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::time::SystemTime;

use futures::future::BoxFuture;

pub use content::{
    ContentMetadataProvider, ContentSniffingService, MediaMetadata, ParserClient,
};
pub use dlp::{DlpMetadataProvider, DlpProperties, DlpService};
pub use external::{EntryProperties, EntryPropertiesService, ExternalMetadataProvider};
pub use file_system::{
    FileSystemMetadata, FileSystemMetadataProvider, FileSystemService, LocalFileSystem,
};
pub use multi::MultiMetadataProvider;

use crate::error::{MetadataError, MetadataResult, PropertyError};
use crate::parsers::{ExifDirectories, ImageTransform};

macro_rules! property_names {
    ($( $name:ident => $value:expr ),* $(,)?) => {
        /// Every metadata property known to the providers.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[allow(missing_docs)]
        pub enum PropertyName {
            $( $name, )*
        }

        impl PropertyName {
            /// All property names.
            pub const ALL: &'static [PropertyName] = &[$( PropertyName::$name, )*];

            /// The camel-case name of the property.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( PropertyName::$name => $value, )*
                }
            }
        }

        impl FromStr for PropertyName {
            type Err = MetadataError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $value => Ok(PropertyName::$name), )*
                    _ => Err(MetadataError::UnknownProperty(s.to_string())),
                }
            }
        }
    };
}

property_names! {
    AlternateUrl => "alternateUrl",
    AvailableOffline => "availableOffline",
    AvailableWhenMetered => "availableWhenMetered",
    CanAddChildren => "canAddChildren",
    CanCopy => "canCopy",
    CanDelete => "canDelete",
    CanPin => "canPin",
    CanRename => "canRename",
    CanShare => "canShare",
    ContentImageTransform => "contentImageTransform",
    ContentThumbnailTransform => "contentThumbnailTransform",
    ContentThumbnailUrl => "contentThumbnailUrl",
    CroppedThumbnailUrl => "croppedThumbnailUrl",
    CustomIconUrl => "customIconUrl",
    Dirty => "dirty",
    ExifLittleEndian => "exifLittleEndian",
    Hosted => "hosted",
    Ifd => "ifd",
    ImageHeight => "imageHeight",
    ImageRotation => "imageRotation",
    ImageWidth => "imageWidth",
    IsDlpRestricted => "isDlpRestricted",
    IsExternalMedia => "isExternalMedia",
    IsMachineRoot => "isMachineRoot",
    IsRestrictedForDestination => "isRestrictedForDestination",
    MediaAlbum => "mediaAlbum",
    MediaArtist => "mediaArtist",
    MediaDuration => "mediaDuration",
    MediaGenre => "mediaGenre",
    MediaMimeType => "mediaMimeType",
    MediaTitle => "mediaTitle",
    MediaTrack => "mediaTrack",
    MediaYearRecorded => "mediaYearRecorded",
    ModificationByMeTime => "modificationByMeTime",
    ModificationTime => "modificationTime",
    Pinned => "pinned",
    Present => "present",
    ShareUrl => "shareUrl",
    Shared => "shared",
    SharedWithMe => "sharedWithMe",
    Size => "size",
    SourceUrl => "sourceUrl",
    ThumbnailUrl => "thumbnailUrl",
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of a fulfilled property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A flag such as `present` or `canCopy`.
    Bool(bool),
    /// A count or size. Directories report a size of `-1`.
    Integer(i64),
    /// A duration in seconds.
    Float(f64),
    /// Text, URLs and mime types.
    Text(String),
    /// A timestamp.
    Time(SystemTime),
    /// An orientation transform.
    Transform(ImageTransform),
    /// Parsed EXIF directories.
    Ifd(Box<ExifDirectories>),
}

impl PropertyValue {
    /// The flag, if this is a [`PropertyValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number, if this is a [`PropertyValue::Integer`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The text, if this is a [`PropertyValue::Text`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<SystemTime> for PropertyValue {
    fn from(value: SystemTime) -> Self {
        Self::Time(value)
    }
}

impl From<ImageTransform> for PropertyValue {
    fn from(value: ImageTransform) -> Self {
        Self::Transform(value)
    }
}

impl From<ExifDirectories> for PropertyValue {
    fn from(value: ExifDirectories) -> Self {
        Self::Ifd(Box::new(value))
    }
}

/// The state of one property of a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// Requested, but no answer yet.
    Pending,
    /// Answered. `None` means the provider had no value for it.
    Fulfilled(Option<PropertyValue>),
    /// The provider could not obtain the property.
    Failed(PropertyError),
}

impl Property {
    /// The value, if the property was fulfilled with one.
    pub fn value(&self) -> Option<&PropertyValue> {
        match self {
            Self::Fulfilled(value) => value.as_ref(),
            _ => None,
        }
    }

    /// The error, if the property failed.
    pub fn error(&self) -> Option<&PropertyError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// A sparse set of properties for one file.
///
/// A name that is absent was never requested (or the provider never reported it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataItem(BTreeMap<PropertyName, Property>);

impl MetadataItem {
    /// An empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// The property stored for `name`.
    pub fn get(&self, name: PropertyName) -> Option<&Property> {
        self.0.get(&name)
    }

    /// The value of `name`, if it was fulfilled with one.
    pub fn value(&self, name: PropertyName) -> Option<&PropertyValue> {
        self.get(name).and_then(Property::value)
    }

    /// The error of `name`, if it failed.
    pub fn error(&self, name: PropertyName) -> Option<&PropertyError> {
        self.get(name).and_then(Property::error)
    }

    /// Whether `name` is present in any state.
    pub fn contains(&self, name: PropertyName) -> bool {
        self.0.contains_key(&name)
    }

    /// Store a property.
    pub fn insert(&mut self, name: PropertyName, property: Property) {
        self.0.insert(name, property);
    }

    /// Store a fulfilled property.
    pub fn set(&mut self, name: PropertyName, value: impl Into<PropertyValue>) {
        self.insert(name, Property::Fulfilled(Some(value.into())));
    }

    /// Store a fulfilled property that may have no value.
    pub fn set_optional<V: Into<PropertyValue>>(&mut self, name: PropertyName, value: Option<V>) {
        self.insert(name, Property::Fulfilled(value.map(Into::into)));
    }

    /// Store a failed property.
    pub fn set_error(&mut self, name: PropertyName, error: PropertyError) {
        self.insert(name, Property::Failed(error));
    }

    /// Copy every property of `other` into this item, overwriting existing ones.
    pub fn merge(&mut self, other: MetadataItem) {
        self.0.extend(other.0);
    }

    /// Names present in this item.
    pub fn names(&self) -> impl Iterator<Item = PropertyName> + '_ {
        self.0.keys().copied()
    }

    /// Iterate over the stored properties.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyName, &Property)> {
        self.0.iter().map(|(name, property)| (*name, property))
    }

    /// Number of stored properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no property is stored.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PropertyName, Property)> for MetadataItem {
    fn from_iter<T: IntoIterator<Item = (PropertyName, Property)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for MetadataItem {
    type Item = (PropertyName, Property);
    type IntoIter = std::collections::btree_map::IntoIter<PropertyName, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The kind of volume a file lives on. Decides which providers are asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum VolumeType {
    Downloads,
    Drive,
    Removable,
    Archive,
    Provided,
    DocumentsProvider,
    Mtp,
    Smb,
    AndroidFiles,
    Testing,
}

/// A file or directory, identified by URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    /// The URL of the entry. Cache keys are built from it.
    pub url: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// The volume holding the entry, if known.
    pub volume_type: Option<VolumeType>,
}

impl FileEntry {
    /// A file with no known volume.
    pub fn file(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_directory: false,
            volume_type: None,
        }
    }

    /// A directory with no known volume.
    pub fn directory(url: impl Into<String>) -> Self {
        Self {
            is_directory: true,
            ..Self::file(url)
        }
    }

    /// Set the volume type.
    pub fn with_volume_type(mut self, volume_type: VolumeType) -> Self {
        self.volume_type = Some(volume_type);
        self
    }
}

/// A request for some properties of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    /// The entry.
    pub entry: FileEntry,
    /// The properties wanted.
    pub names: Vec<PropertyName>,
}

impl MetadataRequest {
    /// Create a request.
    pub fn new(entry: FileEntry, names: Vec<PropertyName>) -> Self {
        Self { entry, names }
    }
}

/// A source of metadata properties.
pub trait MetadataProvider: Debug + Send + Sync {
    /// The properties this provider can supply.
    fn property_names(&self) -> &[PropertyName];

    /// Fail if any of `names` is not supplied by this provider.
    fn check_property_names(&self, names: &[PropertyName]) -> MetadataResult<()> {
        let known = self.property_names();
        match names.iter().find(|name| !known.contains(name)) {
            Some(name) => Err(MetadataError::UnknownProperty(name.to_string())),
            None => Ok(()),
        }
    }

    /// Answer `requests`, returning one item per request, in order.
    fn get(&self, requests: Vec<MetadataRequest>) -> BoxFuture<'_, Vec<MetadataItem>>;
}

/// Append the names in `names` that are not already in `list`.
pub(crate) fn extend_unique(list: &mut Vec<PropertyName>, names: &[PropertyName]) {
    for name in names {
        if !list.contains(name) {
            list.push(*name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_name_round_trip() {
        for name in PropertyName::ALL {
            assert_eq!(name.as_str().parse::<PropertyName>().unwrap(), *name);
        }
        let err = "imageWidht".parse::<PropertyName>().unwrap_err();
        assert!(matches!(err, MetadataError::UnknownProperty(name) if name == "imageWidht"));
    }

    #[test]
    fn test_item_accessors() {
        let mut item = MetadataItem::new();
        item.set(PropertyName::Size, 10i64);
        item.set_optional::<String>(PropertyName::MediaTitle, None);
        item.set_error(PropertyName::ModificationTime, PropertyError::new("gone"));

        assert_eq!(item.value(PropertyName::Size).and_then(PropertyValue::as_i64), Some(10));
        assert_eq!(item.get(PropertyName::MediaTitle), Some(&Property::Fulfilled(None)));
        assert_eq!(item.error(PropertyName::ModificationTime).unwrap().0, "gone");
        assert!(!item.contains(PropertyName::Present));

        let mut other = MetadataItem::new();
        other.set(PropertyName::Size, 20i64);
        item.merge(other);
        assert_eq!(item.value(PropertyName::Size), Some(&PropertyValue::Integer(20)));
        assert_eq!(item.len(), 3);
    }
}
