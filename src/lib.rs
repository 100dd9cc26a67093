//! Core library for the `volctl` volume orchestration tool.
//!
//! The crate presents one driver-agnostic surface for block-storage volume
//! lifecycle management: create, attach, detach, and remove volumes through a
//! [`StorageDriver`], then format and mount them on the local host through the
//! [`VolumeManager`]. Backends differ only in the driver they register with
//! the [`DriverRegistry`].

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod exec;
pub mod manager;
pub mod memory;
pub mod model;
pub mod mount_table;
pub mod registry;
pub mod scaleway;
pub mod storage;
pub mod test_support;
pub mod tracker;

pub use config::{ConfigError, VolctlConfig};
pub use device::{BlockDevice, BlockDeviceResolver};
pub use driver::{DriverFuture, NewVolume, StorageDriver, VolumeSelector};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use exec::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use manager::{MountRequest, VolumeManager};
pub use memory::MemoryDriver;
pub use model::{
    Attachment, AttachmentStatus, BlockDeviceMapping, Capabilities, MountRecord, Volume,
    VolumeStatus,
};
pub use mount_table::{HostMountTable, MountTable};
pub use registry::DriverRegistry;
pub use scaleway::{ScalewayDriver, ScalewayDriverConfig, ScalewayDriverError};
pub use storage::{AttachmentRequest, CreateVolumeRequest, Storage};
pub use tracker::{AsyncOperation, OperationId, OperationState, OperationTracker, Tracked};
