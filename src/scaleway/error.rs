//! Error types for the Scaleway driver.

use reqwest::StatusCode;
use scaleway_rs::{ScalewayApiError, ScalewayError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::error::StorageError;

use super::SCALEWAY_DRIVER_NAME;

/// Errors raised by the Scaleway driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayDriverError {
    /// Raised when the configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the API reports that a volume does not exist.
    #[error("volume {volume_id} not found in zone {zone}")]
    VolumeNotFound {
        /// Volume identifier that was not found.
        volume_id: String,
        /// Zone where lookup was attempted.
        zone: String,
    },
    /// Raised when the API does not know the requested server.
    #[error("instance {instance_id} not found in zone {zone}")]
    InstanceNotFound {
        /// Instance identifier that was not found.
        instance_id: String,
        /// Zone where lookup was attempted.
        zone: String,
    },
    /// Raised when a volume is absent from the server's volume map.
    #[error("volume {volume_id} is not attached to instance {instance_id}")]
    AttachmentNotFound {
        /// Volume identifier.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
    },
    /// Raised when the API rejects a volume request.
    #[error("{action} failed for volume {volume} (HTTP {status}): {message}")]
    Api {
        /// Operation that failed.
        action: &'static str,
        /// Volume name or identifier.
        volume: String,
        /// HTTP status code.
        status: u16,
        /// Body returned by the API.
        message: String,
    },
    /// Raised when a volume cannot be attached to an instance.
    #[error("failed to attach volume {volume_id} to instance {instance_id}: {message}")]
    VolumeAttachmentFailed {
        /// Volume identifier that could not be attached.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when a volume cannot be detached from an instance.
    #[error("failed to detach volume {volume_id} from instance {instance_id}: {message}")]
    VolumeDetachFailed {
        /// Volume identifier that could not be detached.
        volume_id: String,
        /// Instance identifier.
        instance_id: String,
        /// Error message from the provider.
        message: String,
    },
    /// Raised when the metadata service cannot identify this host.
    #[error("cannot determine local instance id: {0}")]
    Metadata(String),
    /// Raised when a size does not fit the API's byte count.
    #[error("volume size of {size} GiB is out of range")]
    SizeOutOfRange {
        /// Requested size in GiB.
        size: u64,
    },
    /// Wrapper for transport and SDK failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK or HTTP client.
        message: String,
    },
}

impl ScalewayDriverError {
    pub(crate) fn api(
        action: &'static str,
        volume: impl Into<String>,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            action,
            volume: volume.into(),
            status: status.as_u16(),
            message: message.into(),
        }
    }

    pub(crate) fn provider(err: &impl std::fmt::Display) -> Self {
        Self::Provider {
            message: err.to_string(),
        }
    }

    /// Classifies a failed server lookup, keeping unknown servers apart from
    /// transport and SDK failures.
    pub(crate) fn instance_lookup(err: ScalewayError, instance_id: &str, zone: &str) -> Self {
        match err {
            ScalewayError::Api(api_err) if is_unknown_resource(&api_err) => Self::InstanceNotFound {
                instance_id: instance_id.to_owned(),
                zone: zone.to_owned(),
            },
            other => Self::from(other),
        }
    }
}

fn is_unknown_resource(err: &ScalewayApiError) -> bool {
    err.etype == "unknown_resource" || err.etype == "not_found"
}

impl From<ScalewayError> for ScalewayDriverError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayDriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<ScalewayDriverError> for StorageError {
    fn from(value: ScalewayDriverError) -> Self {
        match value {
            ScalewayDriverError::VolumeNotFound { volume_id, .. } => {
                Self::NotFound(format!("volume {volume_id}"))
            }
            ScalewayDriverError::InstanceNotFound { .. }
            | ScalewayDriverError::AttachmentNotFound { .. } => Self::NotFound(value.to_string()),
            ScalewayDriverError::SizeOutOfRange { .. } => Self::InvalidArgument(value.to_string()),
            ScalewayDriverError::Api { status, .. }
                if status == StatusCode::CONFLICT.as_u16() =>
            {
                Self::Conflict(value.to_string())
            }
            other => Self::driver(SCALEWAY_DRIVER_NAME, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(
        ScalewayDriverError::VolumeNotFound {
            volume_id: String::from("v"),
            zone: String::from("fr-par-1"),
        },
        ErrorKind::NotFound
    )]
    #[case(ScalewayDriverError::SizeOutOfRange { size: u64::MAX }, ErrorKind::InvalidArgument)]
    #[case(
        ScalewayDriverError::api("delete_volume", "v", StatusCode::CONFLICT, "in use"),
        ErrorKind::Conflict
    )]
    #[case(
        ScalewayDriverError::api("create_volume", "data", StatusCode::BAD_REQUEST, "quota"),
        ErrorKind::Driver
    )]
    #[case(
        ScalewayDriverError::AttachmentNotFound {
            volume_id: String::from("v"),
            instance_id: String::from("srv-1"),
        },
        ErrorKind::NotFound
    )]
    #[case(
        ScalewayDriverError::InstanceNotFound {
            instance_id: String::from("srv-1"),
            zone: String::from("fr-par-1"),
        },
        ErrorKind::NotFound
    )]
    #[case(ScalewayDriverError::Metadata(String::from("timeout")), ErrorKind::Driver)]
    fn converts_into_storage_taxonomy(#[case] error: ScalewayDriverError, #[case] kind: ErrorKind) {
        assert_eq!(StorageError::from(error).kind(), kind);
    }

    fn api_error(etype: &str) -> ScalewayError {
        ScalewayError::Api(ScalewayApiError {
            message: String::from("lookup failed"),
            resource: Some(String::from("instance_server")),
            resource_id: Some(String::from("srv-1")),
            etype: etype.to_owned(),
        })
    }

    #[rstest]
    #[case::unknown_server("unknown_resource", ErrorKind::NotFound)]
    #[case::denied("denied_authentication", ErrorKind::Driver)]
    fn server_lookup_failures_are_classified(#[case] etype: &str, #[case] kind: ErrorKind) {
        let error = ScalewayDriverError::instance_lookup(api_error(etype), "srv-1", "fr-par-1");
        assert_eq!(StorageError::from(error).kind(), kind);
    }

    #[test]
    fn driver_errors_carry_backend_text() {
        let error = StorageError::from(ScalewayDriverError::api(
            "create_volume",
            "data",
            StatusCode::BAD_REQUEST,
            "quota exceeded",
        ));
        assert_eq!(
            error.to_string(),
            "scaleway driver error: create_volume failed for volume data (HTTP 400): quota exceeded"
        );
    }
}
