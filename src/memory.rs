//! In-process reference backend.
//!
//! The memory driver keeps volumes in a shared table and simulates slow
//! backend completion: every issued create, attach, or detach stays in its
//! transitional state for a configurable number of volume reads before it
//! settles. It backs the `memory` registry entry and the test suite.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::driver::{DEFAULT_FILESYSTEM, DriverFuture, NewVolume, StorageDriver, VolumeSelector};
use crate::error::StorageError;
use crate::model::{
    Attachment, AttachmentStatus, BlockDeviceMapping, Capabilities, Volume, VolumeStatus,
};

/// Registry name of the memory driver.
pub const MEMORY_DRIVER_NAME: &str = "memory";

const DEVICE_PREFIX: &str = "/dev/xvd";
const DEVICE_LETTERS: &str = "bcdefghijklmnopqrstuvwxyz";

#[derive(Debug)]
struct Entry {
    volume: Volume,
    remaining_reads: u32,
}

#[derive(Debug, Default)]
struct State {
    volumes: Vec<Entry>,
    snapshots: HashMap<String, u64>,
}

/// Reference driver storing volumes in memory.
#[derive(Clone, Debug)]
pub struct MemoryDriver {
    instance_id: String,
    capabilities: Capabilities,
    completion_reads: u32,
    filesystem: String,
    state: Arc<Mutex<State>>,
}

impl MemoryDriver {
    /// Creates a driver that reports `instance_id` as the local host and
    /// settles operations immediately.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            capabilities: Capabilities {
                multi_attach: false,
                iops: true,
                snapshots: true,
                availability_zones: true,
                forced_detach: true,
                remove_detaches: false,
            },
            completion_reads: 0,
            filesystem: DEFAULT_FILESYSTEM.to_owned(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Number of volume reads an issued operation stays transitional for.
    #[must_use]
    pub const fn completion_reads(mut self, reads: u32) -> Self {
        self.completion_reads = reads;
        self
    }

    /// Overrides the advertised capabilities.
    #[must_use]
    pub const fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Overrides the preferred filesystem.
    #[must_use]
    pub fn filesystem(mut self, filesystem: impl Into<String>) -> Self {
        self.filesystem = filesystem.into();
        self
    }

    /// Seeds a snapshot that create requests may restore from.
    pub async fn add_snapshot(&self, snapshot_id: impl Into<String>, size: u64) {
        self.state
            .lock()
            .await
            .snapshots
            .insert(snapshot_id.into(), size);
    }

    fn not_found(volume_id: &str) -> StorageError {
        StorageError::NotFound(format!("volume {volume_id}"))
    }

    fn next_device(volumes: &[Entry], instance_id: &str) -> Result<String, StorageError> {
        let used: Vec<&str> = volumes
            .iter()
            .flat_map(|entry| entry.volume.live_attachments())
            .filter(|attachment| attachment.instance_id == instance_id)
            .map(|attachment| attachment.device.as_str())
            .collect();

        DEVICE_LETTERS
            .chars()
            .map(|letter| format!("{DEVICE_PREFIX}{letter}"))
            .find(|candidate| !used.contains(&candidate.as_str()))
            .ok_or_else(|| {
                StorageError::driver(
                    MEMORY_DRIVER_NAME,
                    format!("no free device slots on instance {instance_id}"),
                )
            })
    }
}

impl Entry {
    fn observe(&mut self) {
        if self.remaining_reads > 0 {
            self.remaining_reads -= 1;
        }
        if self.remaining_reads == 0 {
            self.settle();
        }
    }

    fn settle(&mut self) {
        let volume = &mut self.volume;
        volume
            .attachments
            .retain(|attachment| attachment.status != AttachmentStatus::Detaching);
        for attachment in &mut volume.attachments {
            if attachment.status == AttachmentStatus::Attaching {
                attachment.status = AttachmentStatus::Attached;
            }
        }
        if matches!(
            volume.status,
            VolumeStatus::Creating | VolumeStatus::Available | VolumeStatus::InUse
        ) {
            volume.status = if volume.attachments.is_empty() {
                VolumeStatus::Available
            } else {
                VolumeStatus::InUse
            };
        }
    }

    fn start_transition(&mut self, reads: u32) {
        self.remaining_reads = reads;
        if reads == 0 {
            self.settle();
        }
    }
}

impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        MEMORY_DRIVER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn local_instance_id(&self) -> DriverFuture<'_, String> {
        Box::pin(async move { Ok(self.instance_id.clone()) })
    }

    fn preferred_filesystem(&self) -> &str {
        &self.filesystem
    }

    fn volume_mapping(&self) -> DriverFuture<'_, Vec<BlockDeviceMapping>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .volumes
                .iter()
                .filter_map(|entry| entry.volume.attachment_for(&self.instance_id))
                .filter(|attachment| attachment.status == AttachmentStatus::Attached)
                .map(|attachment| BlockDeviceMapping {
                    volume_id: attachment.volume_id.clone(),
                    instance_id: attachment.instance_id.clone(),
                    device_path: attachment.device.as_str().into(),
                })
                .collect())
        })
    }

    fn volumes<'a>(&'a self, selector: &'a VolumeSelector) -> DriverFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(state
                .volumes
                .iter_mut()
                .filter(|entry| selector.matches(&entry.volume))
                .map(|entry| {
                    entry.observe();
                    entry.volume.clone()
                })
                .collect())
        })
    }

    fn issue_create<'a>(&'a self, request: &'a NewVolume) -> DriverFuture<'a, Volume> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let size = match request.snapshot_id.as_deref() {
                Some(snapshot_id) => {
                    let snapshot_size = state.snapshots.get(snapshot_id).copied().ok_or_else(
                        || StorageError::NotFound(format!("snapshot {snapshot_id}")),
                    )?;
                    if request.size == 0 {
                        snapshot_size
                    } else {
                        request.size
                    }
                }
                None => request.size,
            };

            let volume = Volume {
                id: format!("vol-{}", Uuid::new_v4().simple()),
                name: request.name.clone(),
                size,
                iops: request.iops,
                availability_zone: request.availability_zone.clone(),
                volume_type: request.volume_type.clone(),
                status: VolumeStatus::Creating,
                attachments: Vec::new(),
            };
            debug!(volume_id = %volume.id, size, "memory driver creating volume");

            let mut entry = Entry {
                volume,
                remaining_reads: 0,
            };
            entry.start_transition(self.completion_reads);
            let snapshot = entry.volume.clone();
            state.volumes.push(entry);
            Ok(snapshot)
        })
    }

    fn remove_volume<'a>(&'a self, volume_id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let position = state
                .volumes
                .iter()
                .position(|entry| entry.volume.id == volume_id)
                .ok_or_else(|| Self::not_found(volume_id))?;

            let attached = state
                .volumes
                .get(position)
                .is_some_and(|entry| entry.volume.live_attachments().next().is_some());
            if attached && !self.capabilities.remove_detaches {
                return Err(StorageError::Conflict(format!(
                    "volume {volume_id} has live attachments"
                )));
            }

            state.volumes.remove(position);
            debug!(volume_id, "memory driver removed volume");
            Ok(())
        })
    }

    fn issue_attach<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, Attachment> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let device = Self::next_device(&state.volumes, instance_id)?;
            let entry = state
                .volumes
                .iter_mut()
                .find(|entry| entry.volume.id == volume_id)
                .ok_or_else(|| Self::not_found(volume_id))?;

            if let Some(existing) = entry
                .volume
                .live_attachments()
                .find(|attachment| attachment.instance_id == instance_id)
            {
                return Ok(existing.clone());
            }

            let held_elsewhere = entry.volume.live_attachments().next().is_some();
            if held_elsewhere && !self.capabilities.multi_attach {
                if !force {
                    return Err(StorageError::Conflict(format!(
                        "volume {volume_id} is attached to another instance"
                    )));
                }
                entry.volume.attachments.clear();
            }

            let attachment = Attachment {
                volume_id: volume_id.to_owned(),
                instance_id: instance_id.to_owned(),
                device,
                status: AttachmentStatus::Attaching,
            };
            entry.volume.attachments.push(attachment);
            entry.volume.status = VolumeStatus::InUse;
            entry.start_transition(self.completion_reads);

            entry
                .volume
                .attachment_for(instance_id)
                .cloned()
                .ok_or_else(|| Self::not_found(volume_id))
        })
    }

    fn issue_detach<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let entry = state
                .volumes
                .iter_mut()
                .find(|entry| entry.volume.id == volume_id)
                .ok_or_else(|| Self::not_found(volume_id))?;

            let attachment = entry
                .volume
                .attachments
                .iter_mut()
                .find(|attachment| {
                    attachment.instance_id == instance_id && attachment.status.is_live()
                })
                .ok_or_else(|| {
                    StorageError::NotFound(format!(
                        "attachment of volume {volume_id} on instance {instance_id}"
                    ))
                })?;
            attachment.status = AttachmentStatus::Detaching;
            debug!(volume_id, instance_id, force, "memory driver detaching volume");
            entry.start_transition(self.completion_reads);
            Ok(())
        })
    }
}
