//! Scaleway driver configuration.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, require_field};
use crate::device::DEFAULT_DEVICE_DIR;

/// Scaleway specific configuration derived from `SCW_*` environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayDriverConfig {
    /// Secret key used for authentication. The driver is only registered
    /// when this is set.
    pub secret_key: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: Option<String>,
    /// Availability zone used when a request does not name one.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Server identifier of this host. Read from the metadata service when
    /// unset.
    pub instance_id: Option<String>,
    /// Directory holding persistent device links.
    #[ortho_config(default = DEFAULT_DEVICE_DIR.to_owned())]
    pub device_dir: String,
}

impl ScalewayDriverConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("volctl")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns `true` when credentials are present, meaning the operator
    /// intends to use the driver.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.secret_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            self.secret_key.as_deref().unwrap_or_default(),
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        require_field(
            self.default_project_id.as_deref().unwrap_or_default(),
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        require_field(
            &self.device_dir,
            &FieldMetadata::new(
                "device link directory",
                "SCW_DEVICE_DIR",
                "device_dir",
                "scaleway",
            ),
        )?;
        Ok(())
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret_key.as_deref().unwrap_or_default().trim()
    }

    pub(crate) fn project(&self) -> &str {
        self.default_project_id
            .as_deref()
            .unwrap_or_default()
            .trim()
    }
}
