//! Parameter structs for lifecycle operations.

use std::time::Duration;

use crate::driver::NewVolume;
use crate::error::{StorageError, StorageResult};
use crate::model::Capabilities;

/// Parameters for `create_volume`.
///
/// Exactly one source must be resolvable: an existing `id` (idempotent
/// re-fetch), a `snapshot_id` (restore, with `size` as an optional override),
/// or a non-zero `size` (new empty volume).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Return immediately with an operation id instead of waiting.
    pub run_async: bool,
    /// Name for a new volume.
    pub name: String,
    /// Identifier of an existing volume.
    pub id: String,
    /// Snapshot to restore from.
    pub snapshot_id: Option<String>,
    /// Backend-specific volume type.
    pub volume_type: Option<String>,
    /// Provisioned IOPS.
    pub iops: Option<u64>,
    /// Size in GiB.
    pub size: u64,
    /// Availability zone.
    pub availability_zone: Option<String>,
    /// Overrides the configured wait deadline.
    pub timeout: Option<Duration>,
}

impl CreateVolumeRequest {
    /// Starts a builder for a [`CreateVolumeRequest`].
    #[must_use]
    pub fn builder() -> CreateVolumeRequestBuilder {
        CreateVolumeRequestBuilder::default()
    }

    /// Checks that the request names a source and only uses parameters the
    /// backend supports. Runs before any backend call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] for missing or contradictory
    /// parameters.
    pub fn validate(&self, driver: &str, capabilities: Capabilities) -> StorageResult<()> {
        let snapshot = self.snapshot();
        if !self.existing_id().is_empty() {
            if snapshot.is_some() || self.size > 0 {
                return Err(StorageError::InvalidArgument(String::from(
                    "a volume id cannot be combined with a snapshot id or size",
                )));
            }
            return Ok(());
        }
        if snapshot.is_none() && self.size == 0 {
            return Err(StorageError::InvalidArgument(String::from(
                "one of size, snapshot id, or volume id is required",
            )));
        }
        unsupported(
            driver,
            "snapshot restore",
            snapshot.is_some(),
            capabilities.snapshots,
        )?;
        unsupported(driver, "provisioned IOPS", self.iops.is_some(), capabilities.iops)?;
        unsupported(
            driver,
            "availability zones",
            self.availability_zone.is_some(),
            capabilities.availability_zones,
        )?;
        Ok(())
    }

    /// Identifier of the existing volume to re-fetch, empty for a new volume.
    #[must_use]
    pub fn existing_id(&self) -> &str {
        self.id.trim()
    }

    /// Snapshot to restore from, ignoring blank values.
    #[must_use]
    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot_id
            .as_deref()
            .map(str::trim)
            .filter(|snapshot| !snapshot.is_empty())
    }

    /// Projects the request onto backend parameters.
    #[must_use]
    pub fn to_new_volume(&self) -> NewVolume {
        NewVolume {
            name: self.name.clone(),
            snapshot_id: self.snapshot().map(str::to_owned),
            volume_type: self.volume_type.clone(),
            iops: self.iops,
            size: self.size,
            availability_zone: self.availability_zone.clone(),
        }
    }
}

fn unsupported(driver: &str, feature: &str, requested: bool, supported: bool) -> StorageResult<()> {
    if requested && !supported {
        return Err(StorageError::InvalidArgument(format!(
            "the {driver} driver does not support {feature}"
        )));
    }
    Ok(())
}

/// Builder for [`CreateVolumeRequest`] that trims string inputs and drops
/// empty optional values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateVolumeRequestBuilder {
    request: CreateVolumeRequest,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|trimmed| !trimmed.is_empty())
}

impl CreateVolumeRequestBuilder {
    /// Sets fire-and-forget mode.
    #[must_use]
    pub const fn run_async(mut self, value: bool) -> Self {
        self.request.run_async = value;
        self
    }

    /// Sets the volume name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.request.name = value.into();
        self
    }

    /// Sets the identifier of an existing volume.
    #[must_use]
    pub fn id(mut self, value: impl Into<String>) -> Self {
        self.request.id = value.into();
        self
    }

    /// Sets the snapshot to restore from.
    #[must_use]
    pub fn snapshot_id(mut self, value: Option<String>) -> Self {
        self.request.snapshot_id = value;
        self
    }

    /// Sets the backend-specific volume type.
    #[must_use]
    pub fn volume_type(mut self, value: Option<String>) -> Self {
        self.request.volume_type = value;
        self
    }

    /// Sets provisioned IOPS.
    #[must_use]
    pub const fn iops(mut self, value: Option<u64>) -> Self {
        self.request.iops = value;
        self
    }

    /// Sets the size in GiB.
    #[must_use]
    pub const fn size(mut self, value: u64) -> Self {
        self.request.size = value;
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn availability_zone(mut self, value: Option<String>) -> Self {
        self.request.availability_zone = value;
        self
    }

    /// Overrides the wait deadline.
    #[must_use]
    pub const fn timeout(mut self, value: Option<Duration>) -> Self {
        self.request.timeout = value;
        self
    }

    /// Builds the request, trimming string inputs. Capability checks happen
    /// when the request reaches a driver.
    #[must_use]
    pub fn build(self) -> CreateVolumeRequest {
        let raw = self.request;
        CreateVolumeRequest {
            run_async: raw.run_async,
            name: raw.name.trim().to_owned(),
            id: raw.id.trim().to_owned(),
            snapshot_id: non_empty(raw.snapshot_id),
            volume_type: non_empty(raw.volume_type),
            iops: raw.iops.filter(|iops| *iops > 0),
            size: raw.size,
            availability_zone: non_empty(raw.availability_zone),
            timeout: raw.timeout,
        }
    }
}

/// Parameters for `attach_volume` and `detach_volume`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttachmentRequest {
    /// Return immediately with an operation id instead of waiting.
    pub run_async: bool,
    /// Target volume.
    pub volume_id: String,
    /// Target instance; empty means the local host.
    pub instance_id: String,
    /// Forwarded to the backend without interpretation.
    pub force: bool,
    /// Overrides the configured wait deadline.
    pub timeout: Option<Duration>,
}

impl AttachmentRequest {
    /// Creates a synchronous request for `volume_id` on the local host.
    #[must_use]
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into().trim().to_owned(),
            ..Self::default()
        }
    }

    /// Targets a specific instance.
    #[must_use]
    pub fn instance_id(mut self, value: impl Into<String>) -> Self {
        self.instance_id = value.into().trim().to_owned();
        self
    }

    /// Sets fire-and-forget mode.
    #[must_use]
    pub const fn run_async(mut self, value: bool) -> Self {
        self.run_async = value;
        self
    }

    /// Sets the force flag.
    #[must_use]
    pub const fn force(mut self, value: bool) -> Self {
        self.force = value;
        self
    }

    /// Overrides the wait deadline.
    #[must_use]
    pub const fn timeout(mut self, value: Option<Duration>) -> Self {
        self.timeout = value;
        self
    }

    /// Target volume with surrounding whitespace removed.
    #[must_use]
    pub fn target_volume(&self) -> &str {
        self.volume_id.trim()
    }

    /// Target instance with surrounding whitespace removed; empty means the
    /// local host.
    #[must_use]
    pub fn target_instance(&self) -> &str {
        self.instance_id.trim()
    }

    /// Ensures a volume is named.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] when the volume id is blank.
    pub fn validate(&self) -> StorageResult<()> {
        if self.target_volume().is_empty() {
            return Err(StorageError::InvalidArgument(String::from(
                "volume id is required",
            )));
        }
        Ok(())
    }
}
