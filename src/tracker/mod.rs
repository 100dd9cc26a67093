//! Completion tracking for slow backend operations.
//!
//! A just-issued operation is either waited on, by polling the backend with an
//! exponentially growing interval until a terminal state or the deadline, or
//! registered as a pending [`AsyncOperation`] whose state a later status query
//! re-derives from a fresh backend read.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::model::{AttachmentStatus, Volume, VolumeStatus};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// Poll cadence and default deadline for synchronous waits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay before the second poll.
    pub initial_interval: Duration,
    /// Upper bound for the doubled interval.
    pub max_interval: Duration,
    /// Deadline applied when the caller does not supply one.
    pub timeout: Duration,
}

impl WaitPolicy {
    /// Builds a policy from explicit values.
    #[must_use]
    pub const fn new(
        initial_interval: Duration,
        max_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            timeout,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_POLL_INTERVAL,
            DEFAULT_MAX_POLL_INTERVAL,
            DEFAULT_WAIT_TIMEOUT,
        )
    }
}

/// Correlation identifier handed out for fire-and-forget operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier previously returned to a caller.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] when `value` is not a UUID.
    pub fn parse(value: &str) -> StorageResult<Self> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|err| StorageError::InvalidArgument(format!("operation id: {err}")))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Lifecycle operation being tracked.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Volume creation.
    Create,
    /// Volume attachment.
    Attach,
    /// Volume detachment.
    Detach,
}

impl OperationKind {
    /// Action label used in logs and timeout errors.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Create => "create_volume",
            Self::Attach => "attach_volume",
            Self::Detach => "detach_volume",
        }
    }

    /// Derives the operation state from a fresh read of the target volume.
    /// `None` means the volume is no longer visible to the backend.
    #[must_use]
    pub fn evaluate(self, volume: Option<&Volume>, instance_id: &str) -> OperationState {
        match (self, volume) {
            (Self::Create | Self::Attach, None) => OperationState::Failed,
            (Self::Detach, None) => OperationState::Complete,
            (_, Some(current)) if current.status == VolumeStatus::Error => OperationState::Failed,
            (Self::Create, Some(current)) => match current.status {
                VolumeStatus::Available | VolumeStatus::InUse => OperationState::Complete,
                _ => OperationState::Pending,
            },
            (Self::Attach, Some(current)) => match current.attachment_for(instance_id) {
                Some(attachment) if attachment.status == AttachmentStatus::Attached => {
                    OperationState::Complete
                }
                _ => OperationState::Pending,
            },
            (Self::Detach, Some(current)) => match current.attachment_for(instance_id) {
                Some(attachment) if attachment.status.is_live() => OperationState::Pending,
                _ => OperationState::Complete,
            },
        }
    }
}

/// State of a tracked operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationState {
    /// The backend has not reached a terminal state yet.
    Pending,
    /// The operation finished successfully.
    Complete,
    /// The operation finished in an error state.
    Failed,
}

impl OperationState {
    /// Returns `true` for `complete` and `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Record of a fire-and-forget operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperation {
    /// Correlation identifier.
    pub operation_id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Volume the operation targets.
    pub target_volume_id: String,
    /// Instance for attach and detach operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Last derived state.
    pub state: OperationState,
    /// Last observed volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Volume>,
    #[serde(skip)]
    issued_at: Instant,
}

/// Value returned by a lifecycle operation together with the correlation id
/// when it was issued in fire-and-forget mode.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracked<T> {
    /// Terminal value (waited) or pre-terminal value (fire-and-forget).
    pub value: T,
    /// Set only for fire-and-forget requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
}

impl<T> Tracked<T> {
    /// Wraps a value obtained by waiting for completion.
    #[must_use]
    pub const fn completed(value: T) -> Self {
        Self {
            value,
            operation_id: None,
        }
    }

    /// Wraps a pre-terminal value with its correlation id.
    #[must_use]
    pub const fn pending(value: T, operation_id: OperationId) -> Self {
        Self {
            value,
            operation_id: Some(operation_id),
        }
    }
}

/// Implements the wait and fire-and-forget modes.
#[derive(Debug)]
pub struct OperationTracker {
    policy: WaitPolicy,
    retention: Duration,
    operations: Mutex<HashMap<OperationId, AsyncOperation>>,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(WaitPolicy::default(), DEFAULT_RETENTION)
    }
}

impl OperationTracker {
    /// Creates a tracker with the given wait policy and record retention.
    #[must_use]
    pub fn new(policy: WaitPolicy, retention: Duration) -> Self {
        Self {
            policy,
            retention,
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the wait policy.
    #[must_use]
    pub const fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Polls until `is_terminal` accepts the polled value or the deadline
    /// passes. `timeout` overrides the policy default.
    ///
    /// The backend operation is never cancelled on timeout; it may still
    /// complete and be observed by a later read.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Timeout`] when the deadline passes, or any
    /// error produced by `poll`.
    pub async fn wait_for<T, F, Fut, P>(
        &self,
        action: &str,
        volume_id: &str,
        timeout: Option<Duration>,
        mut poll: F,
        is_terminal: P,
    ) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
        P: Fn(&T) -> bool,
    {
        let budget = timeout.unwrap_or(self.policy.timeout);
        // A budget too large to represent as an instant never expires.
        let deadline = Instant::now().checked_add(budget);
        let mut interval = self.policy.initial_interval;
        let mut polls: u32 = 0;

        loop {
            let value = poll().await?;
            polls = polls.saturating_add(1);
            if is_terminal(&value) {
                debug!(action, volume_id, polls, "operation reached terminal state");
                return Ok(value);
            }

            let remaining =
                deadline.map_or(interval, |at| at.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                warn!(action, volume_id, polls, ?budget, "gave up waiting for operation");
                return Err(StorageError::Timeout {
                    action: action.to_owned(),
                    volume_id: volume_id.to_owned(),
                });
            }

            sleep(interval.min(remaining)).await;
            interval = self.policy.next_interval(interval);
        }
    }

    /// Records a fire-and-forget operation and returns its identifier.
    pub async fn register(
        &self,
        kind: OperationKind,
        volume_id: &str,
        instance_id: Option<String>,
        initial: Option<Volume>,
    ) -> OperationId {
        let operation_id = OperationId::generate();
        let record = AsyncOperation {
            operation_id,
            kind,
            target_volume_id: volume_id.to_owned(),
            instance_id,
            state: OperationState::Pending,
            result: initial,
            issued_at: Instant::now(),
        };

        let mut operations = self.operations.lock().await;
        self.purge_expired(&mut operations);
        operations.insert(operation_id, record);
        debug!(%operation_id, action = kind.action(), volume_id, "registered pending operation");
        operation_id
    }

    /// Returns a snapshot of a pending record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the identifier is unknown,
    /// already consumed, or expired.
    pub async fn pending(&self, operation_id: OperationId) -> StorageResult<AsyncOperation> {
        let mut operations = self.operations.lock().await;
        self.purge_expired(&mut operations);
        operations
            .get(&operation_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("operation {operation_id}")))
    }

    /// Stores a freshly observed state. Terminal records are removed and
    /// returned, so each terminal result is consumed exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the record disappeared in the
    /// meantime.
    pub async fn settle(
        &self,
        operation_id: OperationId,
        state: OperationState,
        observed: Option<Volume>,
    ) -> StorageResult<AsyncOperation> {
        let mut operations = self.operations.lock().await;
        let record = operations
            .get_mut(&operation_id)
            .ok_or_else(|| StorageError::NotFound(format!("operation {operation_id}")))?;
        record.state = state;
        record.result = observed;
        let snapshot = record.clone();
        if state.is_terminal() {
            operations.remove(&operation_id);
            debug!(%operation_id, ?state, "consumed terminal operation");
        }
        Ok(snapshot)
    }

    /// Number of records currently retained.
    pub async fn len(&self) -> usize {
        self.operations.lock().await.len()
    }

    /// Returns `true` when no records are retained.
    pub async fn is_empty(&self) -> bool {
        self.operations.lock().await.is_empty()
    }

    fn purge_expired(&self, operations: &mut HashMap<OperationId, AsyncOperation>) {
        let retention = self.retention;
        operations.retain(|id, record| {
            let keep = record.issued_at.elapsed() < retention;
            if !keep {
                debug!(operation_id = %id, "dropping expired operation record");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests;
