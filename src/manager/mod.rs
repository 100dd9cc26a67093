//! Host mount state machine.
//!
//! The [`VolumeManager`] turns an attached block device into a mounted
//! filesystem path: it formats blank devices on first use, mounts them under a
//! configured root, unmounts them, and reports where a volume is mounted. The
//! host mount table is the only source of truth and is re-read on every call.

mod locks;

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::model::{MountRecord, Volume};
use crate::mount_table::MountTable;
use crate::storage::Storage;

use self::locks::MountLocks;

/// Default directory under which volumes are mounted.
pub const DEFAULT_MOUNT_ROOT: &str = "/var/lib/volctl/volumes";

/// Parameters for [`VolumeManager::mount_volume`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MountRequest {
    /// Volume name, used when no id is given.
    pub name: String,
    /// Volume identifier; authoritative when set.
    pub id: String,
    /// Destroy and recreate an existing filesystem.
    pub overwrite_fs: bool,
    /// Filesystem to create; defaults to the configured or driver-preferred
    /// type.
    pub fs_type: Option<String>,
    /// Let `mkfs` proceed over signatures it does not recognise.
    pub force_create: bool,
}

impl MountRequest {
    /// Targets a volume by name.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            ..Self::default()
        }
    }

    /// Targets a volume by identifier.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_owned(),
            ..Self::default()
        }
    }

    /// Requests that an existing filesystem be recreated.
    #[must_use]
    pub const fn overwrite_fs(mut self, value: bool) -> Self {
        self.overwrite_fs = value;
        self
    }

    /// Chooses the filesystem to create.
    #[must_use]
    pub fn fs_type(mut self, value: Option<String>) -> Self {
        self.fs_type = value
            .map(|fs| fs.trim().to_owned())
            .filter(|fs| !fs.is_empty());
        self
    }

    /// Passes the force flag to `mkfs`.
    #[must_use]
    pub const fn force_create(mut self, value: bool) -> Self {
        self.force_create = value;
        self
    }
}

#[derive(Debug)]
struct MountPlan {
    device: Utf8PathBuf,
    mount_point: Utf8PathBuf,
    fs_type: String,
    overwrite_fs: bool,
    force_create: bool,
}

/// Mounts, unmounts, and locates volumes on the local host.
pub struct VolumeManager {
    storage: Arc<Storage>,
    mount_table: Arc<dyn MountTable>,
    mount_root: Utf8PathBuf,
    default_fs_type: Option<String>,
    locks: MountLocks,
}

impl std::fmt::Debug for VolumeManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("VolumeManager")
            .field("storage", &self.storage)
            .field("mount_root", &self.mount_root)
            .field("default_fs_type", &self.default_fs_type)
            .finish_non_exhaustive()
    }
}

impl VolumeManager {
    /// Creates a manager mounting volumes of `storage` under `mount_root`.
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        mount_table: Arc<dyn MountTable>,
        mount_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            storage,
            mount_table,
            mount_root: mount_root.into(),
            default_fs_type: None,
            locks: MountLocks::default(),
        }
    }

    /// Overrides the driver-preferred filesystem for blank volumes.
    #[must_use]
    pub fn default_fs_type(mut self, fs_type: Option<String>) -> Self {
        self.default_fs_type = fs_type.filter(|fs| !fs.trim().is_empty());
        self
    }

    /// The storage façade used for identity and device discovery.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Directory under which volumes are mounted.
    #[must_use]
    pub fn mount_root(&self) -> &Utf8Path {
        &self.mount_root
    }

    /// Mounts a volume attached to this host and returns its mount point.
    ///
    /// A device that is already mounted returns its existing mount point. A
    /// blank device, or any device when `overwrite_fs` is set, is formatted
    /// first; otherwise the existing filesystem is mounted as-is.
    ///
    /// # Errors
    ///
    /// Returns identity errors from [`Storage::resolve`],
    /// [`StorageError::NotAttached`] when the volume has no local device,
    /// [`StorageError::Conflict`] when the mount point hosts another device,
    /// and [`StorageError::Host`] when a host tool fails.
    pub async fn mount_volume(&self, request: &MountRequest) -> StorageResult<Utf8PathBuf> {
        let volume = self.storage.resolve(&request.name, &request.id).await?;
        let (instance_id, device) = self.local_device(&volume).await?;
        let Some(device_path) = device else {
            return Err(StorageError::NotAttached {
                volume: volume.id,
                instance_id,
            });
        };

        let plan = MountPlan {
            mount_point: self.mount_point_for(&volume),
            fs_type: request
                .fs_type
                .clone()
                .or_else(|| self.default_fs_type.clone())
                .unwrap_or_else(|| self.storage.preferred_filesystem().to_owned()),
            overwrite_fs: request.overwrite_fs,
            force_create: request.force_create,
            device: device_path,
        };

        let _guard = self
            .locks
            .acquire(&[plan.device.as_str(), plan.mount_point.as_str()])
            .await;
        let volume_id = volume.id;
        let mount_point = self
            .with_table(move |table| mount_device(table, &plan))
            .await?;
        info!(%volume_id, %mount_point, "volume mounted");
        Ok(mount_point)
    }

    /// Unmounts a volume. When the device has already disappeared, the
    /// mount is located by its derived mount point, and a lazy unmount is
    /// attempted if the regular one fails.
    ///
    /// # Errors
    ///
    /// Returns identity errors from [`Storage::resolve`],
    /// [`StorageError::NotMounted`] when no mount exists, and
    /// [`StorageError::Host`] when even the lazy unmount fails.
    pub async fn unmount_volume(&self, name: &str, id: &str) -> StorageResult<()> {
        let volume = self.storage.resolve(name, id).await?;
        let (_, device) = self.local_device(&volume).await?;
        let derived = self.mount_point_for(&volume);

        let mut keys = vec![derived.as_str()];
        if let Some(path) = device.as_ref() {
            keys.push(path.as_str());
        }
        let _guard = self.locks.acquire(&keys).await;

        let lookup_device = device.clone();
        let lookup_point = derived.clone();
        let record = self
            .with_table(move |table| {
                Ok(find_record(
                    &table.mounts()?,
                    lookup_device.as_deref(),
                    &lookup_point,
                ))
            })
            .await?
            .ok_or_else(|| StorageError::NotMounted {
                volume: volume.display_name().to_owned(),
            })?;

        let mount_point = record.mount_point.clone();
        self.with_table(move |table| unmount_record(table, &record))
            .await?;
        info!(volume_id = %volume.id, %mount_point, "volume unmounted");
        Ok(())
    }

    /// Returns the mount point of a volume, or `None` when it exists but is
    /// not mounted.
    ///
    /// # Errors
    ///
    /// Returns identity errors from [`Storage::resolve`] and
    /// [`StorageError::Host`] when the mount table cannot be read.
    pub async fn path_of_volume(&self, name: &str, id: &str) -> StorageResult<Option<Utf8PathBuf>> {
        let volume = self.storage.resolve(name, id).await?;
        let (_, device) = self.local_device(&volume).await?;
        let derived = self.mount_point_for(&volume);
        let record = self
            .with_table(move |table| Ok(find_record(&table.mounts()?, device.as_deref(), &derived)))
            .await?;
        Ok(record.map(|found| found.mount_point))
    }

    /// Returns the local instance id and the device backing `volume` on it.
    async fn local_device(&self, volume: &Volume) -> StorageResult<(String, Option<Utf8PathBuf>)> {
        let instance_id = self.storage.local_instance_id().await?;
        let mappings = self.storage.list_volume_mappings().await?;
        let device = mappings
            .into_iter()
            .find(|mapping| mapping.volume_id == volume.id && mapping.instance_id == instance_id)
            .map(|mapping| mapping.device_path);
        debug!(volume_id = %volume.id, %instance_id, ?device, "resolved local device");
        Ok((instance_id, device))
    }

    fn mount_point_for(&self, volume: &Volume) -> Utf8PathBuf {
        let label = volume.display_name();
        let safe = if label.contains('/') || label == "." || label == ".." {
            volume.id.as_str()
        } else {
            label
        };
        self.mount_root.join(safe)
    }

    async fn with_table<T, F>(&self, operation: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MountTable) -> StorageResult<T> + Send + 'static,
    {
        let table = Arc::clone(&self.mount_table);
        task::spawn_blocking(move || operation(table.as_ref()))
            .await
            .map_err(|err| StorageError::Host {
                program: String::from("mount table worker"),
                message: err.to_string(),
            })?
    }
}

fn find_record(
    mounts: &[MountRecord],
    device: Option<&Utf8Path>,
    mount_point: &Utf8Path,
) -> Option<MountRecord> {
    device
        .and_then(|path| mounts.iter().find(|record| record.device_path == path))
        .or_else(|| mounts.iter().find(|record| record.mount_point == mount_point))
        .cloned()
}

fn mount_device(table: &dyn MountTable, plan: &MountPlan) -> StorageResult<Utf8PathBuf> {
    let mounts = table.mounts()?;
    if let Some(existing) = mounts
        .iter()
        .find(|record| record.device_path == plan.device)
    {
        debug!(
            device = %plan.device,
            mount_point = %existing.mount_point,
            "device already mounted"
        );
        return Ok(existing.mount_point.clone());
    }
    if let Some(occupant) = mounts
        .iter()
        .find(|record| record.mount_point == plan.mount_point)
    {
        return Err(StorageError::Conflict(format!(
            "mount point {} already hosts {}",
            plan.mount_point, occupant.device_path
        )));
    }

    let existing_fs = table.probe_filesystem(&plan.device)?;
    let fs_type = match existing_fs {
        Some(current) if !plan.overwrite_fs => {
            debug!(device = %plan.device, fs_type = %current, "keeping existing filesystem");
            current
        }
        previous => {
            info!(
                device = %plan.device,
                fs_type = %plan.fs_type,
                previous = ?previous,
                "creating filesystem"
            );
            table.make_filesystem(
                &plan.device,
                &plan.fs_type,
                plan.overwrite_fs || plan.force_create,
            )?;
            plan.fs_type.clone()
        }
    };

    table.mount(&plan.device, &plan.mount_point, &fs_type)?;
    Ok(plan.mount_point.clone())
}

fn unmount_record(table: &dyn MountTable, record: &MountRecord) -> StorageResult<()> {
    match table.unmount(&record.mount_point, false) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(
                mount_point = %record.mount_point,
                error = %err,
                "unmount failed; retrying lazily"
            );
            table.unmount(&record.mount_point, true)
        }
    }
}
