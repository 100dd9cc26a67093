//! Storage driver contract implemented once per backend.
//!
//! Drivers expose the non-blocking *issue* primitives of each lifecycle
//! operation. Waiting for completion, argument validation, and the
//! fire-and-forget bookkeeping are layered on top by [`crate::storage::Storage`]
//! so that every backend shares one implementation of them.

use std::future::Future;
use std::pin::Pin;

use crate::error::StorageError;
use crate::model::{Attachment, BlockDeviceMapping, Capabilities, Volume};

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Filesystem used when neither the caller nor the driver expresses a
/// preference.
pub const DEFAULT_FILESYSTEM: &str = "ext4";

/// Filter applied when enumerating volumes. Both fields empty selects every
/// volume visible to the driver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeSelector {
    /// Exact volume identifier, or empty.
    pub id: String,
    /// Exact volume name, or empty.
    pub name: String,
}

impl VolumeSelector {
    /// Selects every volume.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects a single volume by identifier.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_owned(),
            name: String::new(),
        }
    }

    /// Selects volumes by name.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into().trim().to_owned(),
        }
    }

    /// Returns `true` when `volume` passes the filter.
    #[must_use]
    pub fn matches(&self, volume: &Volume) -> bool {
        (self.id.is_empty() || volume.id == self.id)
            && (self.name.is_empty() || volume.name == self.name)
    }
}

/// Backend-level parameters for creating a new volume. Identity handling and
/// validation have already happened when a driver receives this.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NewVolume {
    /// Name to assign.
    pub name: String,
    /// Snapshot to restore from.
    pub snapshot_id: Option<String>,
    /// Backend-specific volume type.
    pub volume_type: Option<String>,
    /// Provisioned IOPS.
    pub iops: Option<u64>,
    /// Size in GiB; `0` keeps the snapshot size.
    pub size: u64,
    /// Availability zone.
    pub availability_zone: Option<String>,
}

/// Contract every storage backend implements.
pub trait StorageDriver: Send + Sync {
    /// Registry key for the driver (for example `scaleway`).
    fn name(&self) -> &str;

    /// Optional features supported by the backend.
    fn capabilities(&self) -> Capabilities;

    /// Identifier of the instance this process runs on, as the backend
    /// knows it.
    fn local_instance_id(&self) -> DriverFuture<'_, String>;

    /// Filesystem created when a caller mounts a blank volume without naming
    /// one.
    fn preferred_filesystem(&self) -> &str {
        DEFAULT_FILESYSTEM
    }

    /// Enumerates volume-to-device mappings visible on this host. An empty
    /// result is valid.
    fn volume_mapping(&self) -> DriverFuture<'_, Vec<BlockDeviceMapping>>;

    /// Lists volumes matching `selector`. Unknown identifiers yield an empty
    /// result rather than an error.
    fn volumes<'a>(&'a self, selector: &'a VolumeSelector) -> DriverFuture<'a, Vec<Volume>>;

    /// Issues a create request and returns the volume as first reported,
    /// typically in the `creating` state.
    fn issue_create<'a>(&'a self, request: &'a NewVolume) -> DriverFuture<'a, Volume>;

    /// Removes a volume.
    fn remove_volume<'a>(&'a self, volume_id: &'a str) -> DriverFuture<'a, ()>;

    /// Issues an attach request and returns the attachment as first reported.
    fn issue_attach<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, Attachment>;

    /// Issues a detach request. `force` is forwarded without interpretation.
    fn issue_detach<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VolumeStatus;
    use rstest::rstest;

    fn volume(id: &str, name: &str) -> Volume {
        Volume {
            id: id.to_owned(),
            name: name.to_owned(),
            size: 1,
            iops: None,
            availability_zone: None,
            volume_type: None,
            status: VolumeStatus::Available,
            attachments: Vec::new(),
        }
    }

    #[rstest]
    #[case(VolumeSelector::all(), true)]
    #[case(VolumeSelector::by_id("vol-1"), true)]
    #[case(VolumeSelector::by_id("vol-2"), false)]
    #[case(VolumeSelector::by_name(" data "), true)]
    #[case(VolumeSelector::by_name("logs"), false)]
    fn selector_filters(#[case] selector: VolumeSelector, #[case] expected: bool) {
        assert_eq!(selector.matches(&volume("vol-1", "data")), expected);
    }
}
