//! Process-wide table of configured storage drivers.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::config::{ConfigError, VolctlConfig};
use crate::driver::StorageDriver;
use crate::error::{StorageError, StorageResult};
use crate::memory::MemoryDriver;
use crate::scaleway::{ScalewayDriver, ScalewayDriverConfig};
use crate::storage::Storage;
use crate::tracker::OperationTracker;

static GLOBAL: OnceLock<DriverRegistry> = OnceLock::new();

/// Storage façades keyed by driver name.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<Storage>>,
    default_driver: String,
}

impl DriverRegistry {
    /// Creates an empty registry whose default is `default_driver`.
    #[must_use]
    pub fn new(default_driver: impl Into<String>) -> Self {
        Self {
            drivers: BTreeMap::new(),
            default_driver: default_driver.into().trim().to_owned(),
        }
    }

    /// Builds the registry described by configuration. The memory driver is
    /// always present; Scaleway is added when its credentials are set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when either configuration fails validation.
    pub fn from_config(
        config: &VolctlConfig,
        scaleway: &ScalewayDriverConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tracker = || OperationTracker::new(config.wait_policy(), config.operation_retention());

        let mut registry = Self::new(config.default_driver.as_str());
        registry.register_driver(
            MemoryDriver::new(config.memory_instance_id.trim()),
            tracker(),
        );

        if scaleway.is_configured() {
            scaleway.validate()?;
            let driver = ScalewayDriver::new(scaleway.clone())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
            registry.register_driver(driver, tracker());
        } else {
            debug!("SCW_SECRET_KEY unset; scaleway driver not registered");
        }

        debug!(
            drivers = ?registry.names(),
            default = %registry.default_driver,
            "driver registry ready"
        );
        Ok(registry)
    }

    fn register_driver(&mut self, driver: impl StorageDriver + 'static, tracker: OperationTracker) {
        self.register(Arc::new(Storage::new(Arc::new(driver), tracker)));
    }

    /// Adds `storage` under its driver name, replacing any previous entry.
    pub fn register(&mut self, storage: Arc<Storage>) {
        self.drivers.insert(storage.name().to_owned(), storage);
    }

    /// Looks up a driver by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownDriver`] when nothing is registered
    /// under `name`.
    pub fn select(&self, name: &str) -> StorageResult<Arc<Storage>> {
        self.drivers
            .get(name.trim())
            .cloned()
            .ok_or_else(|| StorageError::UnknownDriver(name.trim().to_owned()))
    }

    /// The configured default driver.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownDriver`] when the default is not
    /// registered.
    pub fn default_storage(&self) -> StorageResult<Arc<Storage>> {
        self.select(&self.default_driver)
    }

    /// Registered driver names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Publishes `registry` for the rest of the process. Only the first call
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when a registry is already
    /// installed.
    pub fn install(registry: Self) -> StorageResult<&'static Self> {
        GLOBAL.set(registry).map_err(|_| {
            StorageError::Conflict(String::from("driver registry already installed"))
        })?;
        Self::global()
    }

    /// The process-wide registry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] before [`Self::install`]
    /// has run.
    pub fn global() -> StorageResult<&'static Self> {
        GLOBAL.get().ok_or_else(|| {
            StorageError::InvalidArgument(String::from("driver registry has not been installed"))
        })
    }
}
