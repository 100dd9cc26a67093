//! Resolution of host block devices to backend volume identifiers.
//!
//! Cloud block stores expose attached volumes through udev symlinks named
//! after the volume (for example
//! `/dev/disk/by-id/scsi-0SCW_BSSD_<volume-id> -> ../../sdb`). The resolver
//! scans such a directory and turns every matching link into a
//! [`BlockDevice`].

use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::model::BlockDeviceMapping;

/// Default directory holding persistent device links.
pub const DEFAULT_DEVICE_DIR: &str = "/dev/disk/by-id";

const PARTITION_MARKER: &str = "-part";

/// A host block device backed by a volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    /// Canonical device node (for example `/dev/sdb`).
    pub device_path: Utf8PathBuf,
    /// Volume the device belongs to.
    pub volume_id: String,
}

/// Scans a directory of device links for entries carrying a volume prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockDeviceResolver {
    device_dir: Utf8PathBuf,
    prefix: String,
}

impl BlockDeviceResolver {
    /// Creates a resolver for links named `<prefix><volume-id>` in
    /// `device_dir`.
    #[must_use]
    pub fn new(device_dir: impl Into<Utf8PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            device_dir: device_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Directory being scanned.
    #[must_use]
    pub fn device_dir(&self) -> &Utf8Path {
        &self.device_dir
    }

    /// Lists whole-disk devices whose link name carries the volume prefix.
    /// Partition links are skipped. A missing directory yields no devices.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Host`] when the directory or a link cannot be
    /// read.
    pub fn block_devices(&self) -> StorageResult<Vec<BlockDevice>> {
        let dir = match Dir::open_ambient_dir(&self.device_dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.scan_error(&err)),
        };

        let mut devices = Vec::new();
        for item in dir.entries().map_err(|err| self.scan_error(&err))? {
            let entry = item.map_err(|err| self.scan_error(&err))?;
            let Ok(link_name) = entry.file_name() else {
                continue;
            };
            let Some(volume_id) = self.volume_id_from_link(&link_name) else {
                continue;
            };
            let target = dir
                .read_link(&link_name)
                .map_err(|err| self.scan_error(&err))?;
            let device_path = normalize(&self.device_dir.join(target));
            debug!(%device_path, volume_id, "resolved block device");
            devices.push(BlockDevice {
                device_path,
                volume_id: volume_id.to_owned(),
            });
        }

        devices.sort_by(|left, right| left.volume_id.cmp(&right.volume_id));
        Ok(devices)
    }

    /// Projects the devices onto mappings for `instance_id`.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`Self::block_devices`].
    pub fn mappings(&self, instance_id: &str) -> StorageResult<Vec<BlockDeviceMapping>> {
        Ok(self
            .block_devices()?
            .into_iter()
            .map(|device| BlockDeviceMapping {
                volume_id: device.volume_id,
                instance_id: instance_id.to_owned(),
                device_path: device.device_path,
            })
            .collect())
    }

    fn volume_id_from_link<'a>(&self, link_name: &'a str) -> Option<&'a str> {
        let volume_id = link_name.strip_prefix(self.prefix.as_str())?;
        if volume_id.is_empty() || volume_id.contains(PARTITION_MARKER) {
            return None;
        }
        Some(volume_id)
    }

    fn scan_error(&self, err: &io::Error) -> StorageError {
        StorageError::Host {
            program: format!("device scan of {}", self.device_dir),
            message: err.to_string(),
        }
    }
}

/// Lexically resolves `.` and `..` components of a link target.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut resolved = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::ParentDir => {
                resolved.pop();
            }
            Utf8Component::CurDir => {}
            other => resolved.push(other.as_str()),
        }
    }
    resolved
}
