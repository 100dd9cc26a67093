//! Normalised volume model shared by every backend.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Lifecycle status reported for a volume.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    /// Ready and not attached anywhere.
    Available,
    /// The backend is still provisioning the volume.
    Creating,
    /// At least one attachment is live.
    InUse,
    /// Removal has been requested.
    Deleting,
    /// The backend reported a failure.
    Error,
}

/// Status of a single volume-to-instance attachment.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentStatus {
    /// Attach requested, not yet visible on the instance.
    Attaching,
    /// Device is visible on the instance.
    Attached,
    /// Detach requested.
    Detaching,
    /// Detach completed.
    Detached,
}

impl AttachmentStatus {
    /// Returns `true` while the attachment still occupies the volume.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Detached)
    }
}

/// Association between a volume and a compute instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Attached volume.
    pub volume_id: String,
    /// Instance holding the attachment.
    pub instance_id: String,
    /// Device node on the instance, once known.
    pub device: String,
    /// Current attachment status.
    pub status: AttachmentStatus,
}

/// A block volume as reported by a backend.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Backend-authoritative identifier.
    pub id: String,
    /// Human alias; not guaranteed to be unique.
    pub name: String,
    /// Size in GiB.
    pub size: u64,
    /// Provisioned IOPS, when the backend supports tuning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<u64>,
    /// Locality constraint, when the backend is zonal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Backend-specific volume type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    /// Current lifecycle status.
    pub status: VolumeStatus,
    /// Attachments in backend order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Volume {
    /// Returns the attachment held by `instance_id`, if any.
    #[must_use]
    pub fn attachment_for(&self, instance_id: &str) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|attachment| attachment.instance_id == instance_id)
    }

    /// Returns live attachments, skipping completed detaches.
    pub fn live_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .filter(|attachment| attachment.status.is_live())
    }

    /// Returns the name when set, otherwise the identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Projection resolving an attached volume to a host device node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    /// Attached volume.
    pub volume_id: String,
    /// Instance owning the device.
    pub instance_id: String,
    /// Device node path on the instance.
    pub device_path: Utf8PathBuf,
}

/// An active mount on the local host.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    /// Mounted device node.
    pub device_path: Utf8PathBuf,
    /// Directory the device is mounted on.
    pub mount_point: Utf8PathBuf,
    /// Filesystem type reported by the host.
    pub filesystem_type: String,
}

/// Optional features a backend declares. Callers branch on these flags, never
/// on the backend name.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[expect(
    clippy::struct_excessive_bools,
    reason = "capability flags are independent yes/no answers"
)]
pub struct Capabilities {
    /// A volume may hold attachments on several instances at once.
    pub multi_attach: bool,
    /// Create requests may set provisioned IOPS.
    pub iops: bool,
    /// Volumes can be restored from snapshots.
    pub snapshots: bool,
    /// Create requests may pin an availability zone.
    pub availability_zones: bool,
    /// The backend honours a forced detach.
    pub forced_detach: bool,
    /// Removing an attached volume detaches it first on the backend side.
    pub remove_detaches: bool,
}
