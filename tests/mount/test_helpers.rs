//! Shared fixture for mount BDD scenarios.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use tokio::runtime::{Builder, Runtime};
use volctl::test_support::MemoryMountTable;
use volctl::{MemoryDriver, Storage, StorageResult, VolumeManager};

pub const MOUNT_ROOT: &str = "/srv/volumes";
pub const LOCAL_INSTANCE: &str = "i-local";

/// Result of the last `When` step.
#[derive(Debug)]
pub enum Outcome {
    Mounted(Utf8PathBuf),
    Unmounted,
    Failed(volctl::StorageError),
}

pub struct MountWorld {
    runtime: Runtime,
    pub manager: VolumeManager,
    pub table: MemoryMountTable,
    pub device: RefCell<Option<Utf8PathBuf>>,
    pub outcome: RefCell<Option<Outcome>>,
}

impl MountWorld {
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn record<T>(&self, result: StorageResult<T>, success: impl FnOnce(T) -> Outcome) {
        let outcome = match result {
            Ok(value) => success(value),
            Err(err) => Outcome::Failed(err),
        };
        self.outcome.replace(Some(outcome));
    }
}

#[fixture]
pub fn mount_world() -> MountWorld {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("tokio runtime should build: {err}"));
    let driver = MemoryDriver::new(LOCAL_INSTANCE).filesystem("xfs");
    let storage = Arc::new(Storage::with_driver(driver));
    let table = MemoryMountTable::new();
    let manager = VolumeManager::new(storage, Arc::new(table.clone()), MOUNT_ROOT);
    MountWorld {
        runtime,
        manager,
        table,
        device: RefCell::new(None),
        outcome: RefCell::new(None),
    }
}
