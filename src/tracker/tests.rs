//! Unit tests for the operation tracker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::model::Attachment;

fn fast_policy() -> WaitPolicy {
    WaitPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(4),
        Duration::from_secs(5),
    )
}

#[fixture]
fn tracker() -> OperationTracker {
    OperationTracker::new(fast_policy(), Duration::from_secs(60))
}

fn volume(status: VolumeStatus, attachments: Vec<Attachment>) -> Volume {
    Volume {
        id: String::from("vol-1"),
        name: String::from("data"),
        size: 10,
        iops: None,
        availability_zone: None,
        volume_type: None,
        status,
        attachments,
    }
}

fn attachment(instance_id: &str, status: AttachmentStatus) -> Attachment {
    Attachment {
        volume_id: String::from("vol-1"),
        instance_id: instance_id.to_owned(),
        device: String::from("/dev/xvdb"),
        status,
    }
}

#[test]
fn backoff_doubles_until_capped() {
    let policy = fast_policy();
    let second = policy.next_interval(policy.initial_interval);
    let third = policy.next_interval(second);
    let fourth = policy.next_interval(third);
    assert_eq!(second, Duration::from_millis(2));
    assert_eq!(third, Duration::from_millis(4));
    assert_eq!(fourth, Duration::from_millis(4));
}

#[rstest]
#[tokio::test]
async fn wait_returns_terminal_value_after_polls(tracker: OperationTracker) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let value = tracker
        .wait_for(
            "create_volume",
            "vol-1",
            None,
            move || {
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<u32, StorageError>(seen) }
            },
            |seen| *seen >= 3,
        )
        .await
        .expect("wait should succeed");

    assert_eq!(value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[rstest]
#[case::unbounded(Duration::MAX)]
#[case::centuries(Duration::from_secs(1 << 62))]
#[tokio::test]
async fn oversized_deadline_waits_without_overflow(
    tracker: OperationTracker,
    #[case] timeout: Duration,
) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let value = tracker
        .wait_for(
            "attach_volume",
            "vol-1",
            Some(timeout),
            move || {
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<u32, StorageError>(seen) }
            },
            |seen| *seen >= 2,
        )
        .await
        .expect("wait should succeed");

    assert_eq!(value, 2);
}

#[rstest]
#[tokio::test]
async fn wait_times_out_on_deadline(tracker: OperationTracker) {
    let err = tracker
        .wait_for(
            "create_volume",
            "vol-1",
            Some(Duration::from_millis(10)),
            || async { Ok::<bool, StorageError>(false) },
            |done| *done,
        )
        .await
        .expect_err("wait should time out");

    assert_eq!(
        err,
        StorageError::Timeout {
            action: String::from("create_volume"),
            volume_id: String::from("vol-1"),
        }
    );
}

#[rstest]
#[tokio::test]
async fn wait_propagates_poll_errors(tracker: OperationTracker) {
    let err = tracker
        .wait_for(
            "attach_volume",
            "vol-1",
            None,
            || async { Err::<bool, _>(StorageError::NotFound(String::from("vol-1"))) },
            |done| *done,
        )
        .await
        .expect_err("poll error should surface");

    assert_eq!(err, StorageError::NotFound(String::from("vol-1")));
}

#[rstest]
#[case::creating(
    OperationKind::Create,
    Some(volume(VolumeStatus::Creating, Vec::new())),
    OperationState::Pending
)]
#[case::available(
    OperationKind::Create,
    Some(volume(VolumeStatus::Available, Vec::new())),
    OperationState::Complete
)]
#[case::errored(
    OperationKind::Create,
    Some(volume(VolumeStatus::Error, Vec::new())),
    OperationState::Failed
)]
#[case::vanished(OperationKind::Create, None, OperationState::Failed)]
#[case::attaching(
    OperationKind::Attach,
    Some(volume(VolumeStatus::InUse, vec![attachment("i-1", AttachmentStatus::Attaching)])),
    OperationState::Pending
)]
#[case::attached(
    OperationKind::Attach,
    Some(volume(VolumeStatus::InUse, vec![attachment("i-1", AttachmentStatus::Attached)])),
    OperationState::Complete
)]
#[case::attached_elsewhere(
    OperationKind::Attach,
    Some(volume(VolumeStatus::InUse, vec![attachment("i-2", AttachmentStatus::Attached)])),
    OperationState::Pending
)]
#[case::detaching(
    OperationKind::Detach,
    Some(volume(VolumeStatus::InUse, vec![attachment("i-1", AttachmentStatus::Detaching)])),
    OperationState::Pending
)]
#[case::detached(
    OperationKind::Detach,
    Some(volume(VolumeStatus::Available, Vec::new())),
    OperationState::Complete
)]
#[case::detach_vanished(OperationKind::Detach, None, OperationState::Complete)]
fn evaluate_derives_state(
    #[case] kind: OperationKind,
    #[case] observed: Option<Volume>,
    #[case] expected: OperationState,
) {
    assert_eq!(kind.evaluate(observed.as_ref(), "i-1"), expected);
}

#[rstest]
#[tokio::test]
async fn settle_consumes_terminal_records(tracker: OperationTracker) {
    let id = tracker
        .register(OperationKind::Create, "vol-1", None, None)
        .await;

    let pending = tracker
        .settle(id, OperationState::Pending, None)
        .await
        .expect("record present");
    assert_eq!(pending.state, OperationState::Pending);
    assert_eq!(tracker.len().await, 1);

    let done = tracker
        .settle(
            id,
            OperationState::Complete,
            Some(volume(VolumeStatus::Available, Vec::new())),
        )
        .await
        .expect("record present");
    assert_eq!(done.state, OperationState::Complete);
    assert!(tracker.is_empty().await);

    let err = tracker.pending(id).await.expect_err("record consumed");
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn expired_records_are_purged() {
    let tracker = OperationTracker::new(fast_policy(), Duration::from_millis(1));
    let id = tracker
        .register(OperationKind::Attach, "vol-1", Some(String::from("i-1")), None)
        .await;
    sleep(Duration::from_millis(5)).await;

    let err = tracker.pending(id).await.expect_err("record expired");
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[test]
fn operation_id_round_trips_through_display() {
    let id = OperationId::generate();
    let parsed = OperationId::parse(&id.to_string()).expect("parse");
    assert_eq!(parsed, id);
    assert!(OperationId::parse("not-a-uuid").is_err());
}
