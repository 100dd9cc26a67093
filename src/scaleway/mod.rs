//! Scaleway Instance block storage driver.
//!
//! Volumes are managed through the Instance API in the configured zone.
//! Attachments are expressed by rewriting a server's volume map, so attach
//! and detach both read the current map and `PATCH` it back with the target
//! volume added or removed. Devices are resolved from the
//! `/dev/disk/by-id/scsi-0SCW_BSSD_<volume-id>` links udev creates.

mod attach;
mod config;
mod error;
mod metadata;
mod types;
mod volumes;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use scaleway_rs::ScalewayApi;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::device::BlockDeviceResolver;
use crate::driver::{DriverFuture, NewVolume, StorageDriver, VolumeSelector};
use crate::error::StorageError;
use crate::model::{Attachment, AttachmentStatus, BlockDeviceMapping, Capabilities, Volume};

pub use config::ScalewayDriverConfig;
pub use error::ScalewayDriverError;

/// Registry key of the Scaleway driver.
pub const SCALEWAY_DRIVER_NAME: &str = "scaleway";

/// Prefix of the udev links Scaleway block volumes appear under.
pub const DEVICE_PREFIX: &str = "scsi-0SCW_BSSD_";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Driver backed by the Scaleway Instance API.
#[derive(Clone)]
pub struct ScalewayDriver {
    api: ScalewayApi,
    config: ScalewayDriverConfig,
    resolver: BlockDeviceResolver,
    api_base: String,
    instance_id: OnceCell<String>,
}

impl fmt::Debug for ScalewayDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalewayDriver")
            .field("zone", &self.config.default_zone)
            .field("project", &self.config.project())
            .field("device_dir", &self.resolver.device_dir())
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl ScalewayDriver {
    /// Constructs a driver from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayDriverError::Config`] when the configuration fails
    /// validation.
    pub fn new(config: ScalewayDriverConfig) -> Result<Self, ScalewayDriverError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(config.secret()),
            resolver: BlockDeviceResolver::new(config.device_dir.trim(), DEVICE_PREFIX),
            api_base: String::from(SCALEWAY_INSTANCE_API_BASE),
            instance_id: OnceCell::new(),
            config,
        })
    }

    /// Points the driver at a different Instance API endpoint.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    fn zone(&self) -> &str {
        self.config.default_zone.trim()
    }

    fn zone_url(&self, path: &str) -> String {
        format!("{}/zones/{}/{path}", self.api_base, self.zone())
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Auth-Token", self.config.secret())
    }

    /// Maps volume ids to device nodes for every volume visible on this host.
    fn local_devices(&self) -> Result<BTreeMap<String, String>, StorageError> {
        Ok(self
            .resolver
            .block_devices()?
            .into_iter()
            .map(|device| (device.volume_id, device.device_path.into_string()))
            .collect())
    }

    async fn cached_instance_id(&self) -> Result<String, ScalewayDriverError> {
        self.instance_id
            .get_or_try_init(|| self.discover_instance_id())
            .await
            .cloned()
    }
}

/// Status and body of a completed API call.
#[derive(Debug)]
struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    async fn send(request: RequestBuilder) -> Result<Self, ScalewayDriverError> {
        let response = request
            .send()
            .await
            .map_err(|err| ScalewayDriverError::provider(&err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ScalewayDriverError::provider(&err))?;
        Ok(Self { status, body })
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T, ScalewayDriverError> {
        serde_json::from_str(&self.body).map_err(|err| ScalewayDriverError::provider(&err))
    }

    fn into_error(self, action: &'static str, volume: &str) -> ScalewayDriverError {
        ScalewayDriverError::api(action, volume, self.status, self.body)
    }
}

impl StorageDriver for ScalewayDriver {
    fn name(&self) -> &str {
        SCALEWAY_DRIVER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            snapshots: true,
            ..Capabilities::default()
        }
    }

    fn local_instance_id(&self) -> DriverFuture<'_, String> {
        Box::pin(async move { Ok(self.cached_instance_id().await?) })
    }

    fn volume_mapping(&self) -> DriverFuture<'_, Vec<BlockDeviceMapping>> {
        Box::pin(async move {
            let instance_id = self.cached_instance_id().await?;
            self.resolver.mappings(&instance_id)
        })
    }

    fn volumes<'a>(&'a self, selector: &'a VolumeSelector) -> DriverFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let found = if selector.id.is_empty() {
                self.list_api_volumes(&selector.name).await?
            } else {
                self.fetch_volume(&selector.id).await?.into_iter().collect()
            };
            let devices = self.local_devices()?;
            Ok(found
                .into_iter()
                .map(|volume| volume.into_volume(&devices))
                .filter(|volume| selector.matches(volume))
                .collect())
        })
    }

    fn issue_create<'a>(&'a self, request: &'a NewVolume) -> DriverFuture<'a, Volume> {
        Box::pin(async move {
            let created = self.create_api_volume(request).await?;
            debug!(volume_id = %created.id, zone = self.zone(), "scaleway volume requested");
            Ok(created.into_volume(&BTreeMap::new()))
        })
    }

    fn remove_volume<'a>(&'a self, volume_id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            let current = self.fetch_volume(volume_id).await?.ok_or_else(|| {
                ScalewayDriverError::VolumeNotFound {
                    volume_id: volume_id.to_owned(),
                    zone: self.zone().to_owned(),
                }
            })?;
            if let Some(server) = current.server {
                return Err(StorageError::Conflict(format!(
                    "volume {volume_id} is attached to instance {}",
                    server.id
                )));
            }
            self.delete_api_volume(volume_id).await?;
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
            let current = self.fetch_volume(volume_id).await?.ok_or_else(|| {
                ScalewayDriverError::VolumeNotFound {
                    volume_id: volume_id.to_owned(),
                    zone: self.zone().to_owned(),
                }
            })?;

            match current.server.as_ref().map(|server| server.id.as_str()) {
                Some(holder) if holder == instance_id => {
                    let devices = self.local_devices()?;
                    return Ok(Attachment {
                        volume_id: volume_id.to_owned(),
                        instance_id: instance_id.to_owned(),
                        device: devices.get(volume_id).cloned().unwrap_or_default(),
                        status: AttachmentStatus::Attached,
                    });
                }
                Some(holder) if force => {
                    debug!(volume_id, holder, "forcing volume away from its current instance");
                    self.detach_from_server(holder, volume_id).await?;
                }
                Some(holder) => {
                    return Err(StorageError::Conflict(format!(
                        "volume {volume_id} is attached to instance {holder}"
                    )));
                }
                None => {}
            }

            self.attach_to_server(instance_id, volume_id).await?;
            Ok(Attachment {
                volume_id: volume_id.to_owned(),
                instance_id: instance_id.to_owned(),
                device: String::new(),
                status: AttachmentStatus::Attaching,
            })
        })
    }

    fn issue_detach<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        force: bool,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            debug!(volume_id, instance_id, force, "scaleway detach requested");
            self.detach_from_server(instance_id, volume_id).await?;
            Ok(())
        })
    }
}
