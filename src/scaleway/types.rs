//! Instance API payloads and their projection onto the shared volume model.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{Attachment, AttachmentStatus, Volume, VolumeStatus};

/// Block volume type created by the driver unless the caller names another.
pub(crate) const VOLUME_TYPE_BLOCK: &str = "b_ssd";

/// Scaleway sizes volumes in bytes; the shared model uses GiB.
pub(crate) const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Converts GiB to bytes, `None` on overflow.
pub(crate) const fn size_bytes(size_gb: u64) -> Option<u64> {
    size_gb.checked_mul(BYTES_PER_GB)
}

/// Converts bytes to whole GiB, rounding down.
pub(crate) fn size_gb(bytes: u64) -> u64 {
    bytes.checked_div(BYTES_PER_GB).unwrap_or_default()
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct ServerRef {
    pub(crate) id: String,
}

/// Volume object returned by the Instance API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct ApiVolume {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) size: u64,
    #[serde(default)]
    pub(crate) volume_type: Option<String>,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) zone: Option<String>,
    #[serde(default)]
    pub(crate) server: Option<ServerRef>,
}

impl ApiVolume {
    fn status(&self) -> VolumeStatus {
        match self.state.as_str() {
            "error" => VolumeStatus::Error,
            "fetching" => VolumeStatus::Creating,
            _ if self.server.is_some() => VolumeStatus::InUse,
            _ => VolumeStatus::Available,
        }
    }

    /// Projects the payload onto the shared model. `devices` maps volume ids
    /// to device paths visible on this host.
    pub(crate) fn into_volume(self, devices: &BTreeMap<String, String>) -> Volume {
        let status = self.status();
        let attachments = self
            .server
            .as_ref()
            .map(|server| Attachment {
                volume_id: self.id.clone(),
                instance_id: server.id.clone(),
                device: devices.get(&self.id).cloned().unwrap_or_default(),
                status: AttachmentStatus::Attached,
            })
            .into_iter()
            .collect();

        Volume {
            size: size_gb(self.size),
            iops: None,
            availability_zone: self.zone,
            volume_type: self.volume_type,
            status,
            attachments,
            id: self.id,
            name: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VolumeEnvelope {
    pub(crate) volume: ApiVolume,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VolumeListEnvelope {
    #[serde(default)]
    pub(crate) volumes: Vec<ApiVolume>,
}

/// Body of `POST /zones/{zone}/volumes`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateVolumeBody {
    pub(crate) name: String,
    pub(crate) project: String,
    pub(crate) volume_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) base_snapshot: Option<String>,
}

/// Volume reference for attachment in the Scaleway API.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct VolumeAttachment {
    /// Volume identifier (UUID).
    pub(crate) id: String,
    /// Whether this volume should be used for booting.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) boot: bool,
}

/// Request body for `PATCH /servers/{id}` to replace the volume map.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct UpdateInstanceVolumesRequest {
    /// Volume map keyed by index ("0" for root, "1" for first additional, etc.).
    pub(crate) volumes: HashMap<String, VolumeAttachment>,
}

/// Metadata service response; only the server id is used.
#[derive(Debug, Deserialize)]
pub(crate) struct MetadataResponse {
    pub(crate) id: String,
}
