//! Error taxonomy shared by drivers, the operation tracker, and the volume
//! manager.

use thiserror::Error;

/// Coarse classification of a [`StorageError`], used by callers that branch on
/// the failure category rather than on the message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Insufficient or contradictory caller input.
    InvalidArgument,
    /// Identity resolution found nothing.
    NotFound,
    /// A name matched more than one volume.
    AmbiguousName,
    /// A state-machine violation such as a double attach.
    Conflict,
    /// Mount-class precondition: the volume has no local device.
    NotAttached,
    /// Unmount precondition: no mount record exists.
    NotMounted,
    /// A synchronous wait exceeded its deadline.
    Timeout,
    /// Opaque backend failure.
    Driver,
    /// The registry has no driver with the requested name.
    UnknownDriver,
    /// A local host command failed.
    Host,
}

/// Errors returned by every core operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// Raised before any backend call when the request cannot be satisfied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Raised when a volume, attachment, or operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Raised when a name resolves to several volumes.
    #[error("volume name '{name}' is ambiguous: {matches} volumes match")]
    AmbiguousName {
        /// Name supplied by the caller.
        name: String,
        /// Number of volumes carrying that name.
        matches: usize,
    },
    /// Raised when the request collides with current volume or mount state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Raised when a mount is requested for a volume with no local device.
    #[error("volume {volume} is not attached to instance {instance_id}")]
    NotAttached {
        /// Volume identifier.
        volume: String,
        /// Instance the lookup was scoped to.
        instance_id: String,
    },
    /// Raised when an unmount finds no mount record for the volume.
    #[error("volume {volume} is not mounted")]
    NotMounted {
        /// Volume identifier or name.
        volume: String,
    },
    /// Raised when a synchronous wait exceeds its deadline. The backend
    /// operation may still complete later.
    #[error("timeout waiting for {action} on volume {volume_id}")]
    Timeout {
        /// Operation being waited on.
        action: String,
        /// Target volume identifier.
        volume_id: String,
    },
    /// Wrapper for backend failures carrying the provider's own text.
    #[error("{backend} driver error: {message}")]
    Driver {
        /// Driver name.
        backend: String,
        /// Message returned by the backend.
        message: String,
    },
    /// Raised when the registry has no driver with the given name.
    #[error("unknown storage driver: {0}")]
    UnknownDriver(String),
    /// Raised when a host tool such as `mkfs` or `mount` fails.
    #[error("{program} failed: {message}")]
    Host {
        /// Program that failed.
        program: String,
        /// Exit status and captured stderr.
        message: String,
    },
}

impl StorageError {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AmbiguousName { .. } => ErrorKind::AmbiguousName,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotAttached { .. } => ErrorKind::NotAttached,
            Self::NotMounted { .. } => ErrorKind::NotMounted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Driver { .. } => ErrorKind::Driver,
            Self::UnknownDriver(_) => ErrorKind::UnknownDriver,
            Self::Host { .. } => ErrorKind::Host,
        }
    }

    pub(crate) fn driver(backend: &str, message: impl Into<String>) -> Self {
        Self::Driver {
            backend: backend.to_owned(),
            message: message.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type StorageResult<T> = Result<T, StorageError>;
