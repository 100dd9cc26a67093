//! Lifecycle façade over a single storage driver.
//!
//! [`Storage`] validates requests before any backend call, resolves volume
//! identity, and applies the wait or fire-and-forget completion mode through
//! the [`OperationTracker`]. Every backend therefore shares one
//! implementation of these semantics.

mod requests;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::driver::{StorageDriver, VolumeSelector};
use crate::error::{StorageError, StorageResult};
use crate::model::{Attachment, BlockDeviceMapping, Capabilities, Volume};
use crate::tracker::{
    AsyncOperation, OperationId, OperationKind, OperationState, OperationTracker, Tracked,
};

pub use requests::{AttachmentRequest, CreateVolumeRequest, CreateVolumeRequestBuilder};

/// A storage driver paired with its operation tracker.
pub struct Storage {
    driver: Arc<dyn StorageDriver>,
    tracker: OperationTracker,
}

impl fmt::Debug for Storage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Storage")
            .field("driver", &self.driver.name())
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl Storage {
    /// Wraps `driver` with the given tracker.
    #[must_use]
    pub fn new(driver: Arc<dyn StorageDriver>, tracker: OperationTracker) -> Self {
        Self { driver, tracker }
    }

    /// Wraps `driver` with a default tracker.
    #[must_use]
    pub fn with_driver(driver: impl StorageDriver + 'static) -> Self {
        Self::new(Arc::new(driver), OperationTracker::default())
    }

    /// Registry name of the underlying driver.
    #[must_use]
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Capabilities advertised by the driver.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    /// Filesystem the driver prefers for blank volumes.
    #[must_use]
    pub fn preferred_filesystem(&self) -> &str {
        self.driver.preferred_filesystem()
    }

    /// The tracker holding fire-and-forget records.
    #[must_use]
    pub const fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// Identifier of the local instance as the backend knows it.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn local_instance_id(&self) -> StorageResult<String> {
        self.driver.local_instance_id().await
    }

    /// Lists volume-to-device mappings visible on this host.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn list_volume_mappings(&self) -> StorageResult<Vec<BlockDeviceMapping>> {
        self.driver.volume_mapping().await
    }

    /// Lists volumes. Empty selectors list everything; unknown identifiers
    /// yield an empty result.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn list_volumes(&self, id: &str, name: &str) -> StorageResult<Vec<Volume>> {
        let selector = VolumeSelector {
            id: id.trim().to_owned(),
            name: name.trim().to_owned(),
        };
        self.driver.volumes(&selector).await
    }

    /// Fetches a single volume by identifier, `None` when it does not exist
    /// or the identifier is blank.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn volume(&self, id: &str) -> StorageResult<Option<Volume>> {
        let selector = VolumeSelector::by_id(id);
        if selector.id.is_empty() {
            return Ok(None);
        }
        Ok(self.driver.volumes(&selector).await?.into_iter().next())
    }

    /// Resolves a caller-supplied identity to exactly one volume. The id is
    /// authoritative; a name alone must match exactly one volume.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] when neither is given,
    /// [`StorageError::NotFound`] when nothing matches, and
    /// [`StorageError::AmbiguousName`] when a name matches several volumes.
    pub async fn resolve(&self, name: &str, id: &str) -> StorageResult<Volume> {
        let wanted_id = id.trim();
        let wanted_name = name.trim();
        if !wanted_id.is_empty() {
            return self
                .volume(wanted_id)
                .await?
                .ok_or_else(|| StorageError::NotFound(format!("volume {wanted_id}")));
        }
        if wanted_name.is_empty() {
            return Err(StorageError::InvalidArgument(String::from(
                "a volume name or id is required",
            )));
        }

        let mut matches = self.list_volumes("", wanted_name).await?;
        match matches.len() {
            0 => Err(StorageError::NotFound(format!("volume named {wanted_name}"))),
            1 => matches
                .pop()
                .ok_or_else(|| StorageError::NotFound(format!("volume named {wanted_name}"))),
            count => Err(StorageError::AmbiguousName {
                name: wanted_name.to_owned(),
                matches: count,
            }),
        }
    }

    /// Creates a volume, or re-fetches an existing one when the request
    /// carries an id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] before any backend call for
    /// unresolvable requests, [`StorageError::NotFound`] for an unknown id,
    /// [`StorageError::Timeout`] when the wait deadline passes, and
    /// [`StorageError::Driver`] when the volume enters the error state.
    pub async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
    ) -> StorageResult<Tracked<Volume>> {
        request.validate(self.name(), self.capabilities())?;

        let existing_id = request.existing_id();
        let issued = if existing_id.is_empty() {
            let volume = self.driver.issue_create(&request.to_new_volume()).await?;
            info!(
                driver = self.name(),
                volume_id = %volume.id,
                name = %volume.name,
                size = volume.size,
                "issued volume creation"
            );
            volume
        } else {
            debug!(volume_id = existing_id, "create with id re-fetches existing volume");
            self.volume(existing_id)
                .await?
                .ok_or_else(|| StorageError::NotFound(format!("volume {existing_id}")))?
        };

        if request.run_async {
            let operation_id = self
                .tracker
                .register(OperationKind::Create, &issued.id, None, Some(issued.clone()))
                .await;
            return Ok(Tracked::pending(issued, operation_id));
        }

        let observed = self
            .await_terminal(OperationKind::Create, &issued.id, "", request.timeout)
            .await?;
        self.terminal_volume(OperationKind::Create, &issued.id, "", observed)
            .map(Tracked::completed)
    }

    /// Removes a volume.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown volume and
    /// [`StorageError::Conflict`] when live attachments block removal.
    pub async fn remove_volume(&self, id: &str) -> StorageResult<()> {
        let volume_id = id.trim();
        if volume_id.is_empty() {
            return Err(StorageError::InvalidArgument(String::from(
                "volume id is required",
            )));
        }
        self.driver.remove_volume(volume_id).await?;
        info!(driver = self.name(), volume_id, "removed volume");
        Ok(())
    }

    /// Attaches a volume to an instance (the local host when none is named).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown volume,
    /// [`StorageError::Conflict`] when it is held by another instance without
    /// multi-attach or `force`, and [`StorageError::Timeout`] when the wait
    /// deadline passes.
    pub async fn attach_volume(
        &self,
        request: &AttachmentRequest,
    ) -> StorageResult<Tracked<Attachment>> {
        request.validate()?;
        let instance_id = self.target_instance(request.target_instance()).await?;
        let volume_id = request.target_volume();
        let volume = self
            .volume(volume_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("volume {volume_id}")))?;

        if let Some(existing) = volume
            .live_attachments()
            .find(|attachment| attachment.instance_id == instance_id)
        {
            debug!(volume_id = %volume.id, %instance_id, "volume already attached");
            return Ok(Tracked::completed(existing.clone()));
        }
        let held_elsewhere = volume.live_attachments().next().is_some();
        if held_elsewhere && !self.capabilities().multi_attach && !request.force {
            return Err(StorageError::Conflict(format!(
                "volume {} is attached to another instance",
                volume.id
            )));
        }

        let attachment = self
            .driver
            .issue_attach(&volume.id, &instance_id, request.force)
            .await?;
        info!(
            driver = self.name(),
            volume_id = %volume.id,
            %instance_id,
            force = request.force,
            "issued volume attach"
        );

        if request.run_async {
            let operation_id = self
                .tracker
                .register(OperationKind::Attach, &volume.id, Some(instance_id), None)
                .await;
            return Ok(Tracked::pending(attachment, operation_id));
        }

        let observed = self
            .await_terminal(OperationKind::Attach, &volume.id, &instance_id, request.timeout)
            .await?;
        let settled =
            self.terminal_volume(OperationKind::Attach, &volume.id, &instance_id, observed)?;
        settled
            .attachment_for(&instance_id)
            .cloned()
            .map(Tracked::completed)
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "attachment of volume {} on instance {instance_id}",
                    volume.id
                ))
            })
    }

    /// Detaches a volume from an instance (the local host when none is
    /// named). `force` is forwarded to the driver untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when no matching attachment exists
    /// and [`StorageError::Timeout`] when the wait deadline passes.
    pub async fn detach_volume(&self, request: &AttachmentRequest) -> StorageResult<Tracked<()>> {
        request.validate()?;
        let instance_id = self.target_instance(request.target_instance()).await?;
        let volume_id = request.target_volume();
        if request.force && !self.capabilities().forced_detach {
            debug!(
                driver = self.name(),
                "driver does not declare forced detach; forwarding flag"
            );
        }

        self.driver
            .issue_detach(volume_id, &instance_id, request.force)
            .await?;
        info!(
            driver = self.name(),
            volume_id,
            %instance_id,
            force = request.force,
            "issued volume detach"
        );

        if request.run_async {
            let operation_id = self
                .tracker
                .register(OperationKind::Detach, volume_id, Some(instance_id), None)
                .await;
            return Ok(Tracked::pending((), operation_id));
        }

        let observed = self
            .await_terminal(OperationKind::Detach, volume_id, &instance_id, request.timeout)
            .await?;
        if OperationKind::Detach.evaluate(observed.as_ref(), &instance_id) == OperationState::Failed
        {
            return Err(self.failure(OperationKind::Detach, volume_id));
        }
        Ok(Tracked::completed(()))
    }

    /// Re-derives the state of a fire-and-forget operation from a fresh
    /// backend read. A terminal result is returned once and then forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown, consumed, or expired
    /// operation ids.
    pub async fn operation_status(
        &self,
        operation_id: OperationId,
    ) -> StorageResult<AsyncOperation> {
        let record = self.tracker.pending(operation_id).await?;
        let observed = self.volume(&record.target_volume_id).await?;
        let instance_id = record.instance_id.as_deref().unwrap_or_default();
        let state = record.kind.evaluate(observed.as_ref(), instance_id);
        self.tracker.settle(operation_id, state, observed).await
    }

    async fn target_instance(&self, requested: &str) -> StorageResult<String> {
        if requested.is_empty() {
            self.driver.local_instance_id().await
        } else {
            Ok(requested.to_owned())
        }
    }

    async fn await_terminal(
        &self,
        kind: OperationKind,
        volume_id: &str,
        instance_id: &str,
        timeout: Option<Duration>,
    ) -> StorageResult<Option<Volume>> {
        self.tracker
            .wait_for(
                kind.action(),
                volume_id,
                timeout,
                || self.volume(volume_id),
                |observed| kind.evaluate(observed.as_ref(), instance_id).is_terminal(),
            )
            .await
    }

    fn terminal_volume(
        &self,
        kind: OperationKind,
        volume_id: &str,
        instance_id: &str,
        observed: Option<Volume>,
    ) -> StorageResult<Volume> {
        match (kind.evaluate(observed.as_ref(), instance_id), observed) {
            (OperationState::Complete, Some(volume)) => Ok(volume),
            (_, None) => Err(StorageError::NotFound(format!("volume {volume_id}"))),
            (_, Some(_)) => Err(self.failure(kind, volume_id)),
        }
    }

    fn failure(&self, kind: OperationKind, volume_id: &str) -> StorageError {
        StorageError::driver(
            self.name(),
            format!(
                "{} failed: volume {volume_id} entered the error state",
                kind.action()
            ),
        )
    }
}
