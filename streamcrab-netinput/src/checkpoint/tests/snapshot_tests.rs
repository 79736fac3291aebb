use super::*;

fn sample() -> ChannelStateSnapshot {
    ChannelStateSnapshot::new(
        7,
        BTreeMap::from([(ChannelId(0), vec![1, 2, 3]), (ChannelId(2), Vec::new())]),
    )
}

#[test]
fn test_snapshot_accessors() {
    let snapshot = sample();
    assert_eq!(snapshot.channel(ChannelId(0)), Some(&[1u8, 2, 3][..]));
    assert_eq!(snapshot.channel(ChannelId(2)), Some(&[][..]));
    assert_eq!(snapshot.channel(ChannelId(1)), None);
    assert_eq!(snapshot.total_bytes(), 3);
}

#[test]
fn test_snapshot_bytes_roundtrip() {
    let snapshot = sample();
    let bytes = snapshot.to_bytes().unwrap();
    assert_eq!(ChannelStateSnapshot::from_bytes(&bytes).unwrap(), snapshot);
    assert!(ChannelStateSnapshot::from_bytes(&[0xff]).is_err());
}

#[test]
fn test_handle_resolves_once_completed() {
    let (completer, mut handle) = snapshot_handle(7);
    assert_eq!(handle.checkpoint_id(), 7);
    assert_eq!(completer.checkpoint_id(), 7);
    assert!(handle.try_result().is_none());
    assert!(!handle.is_resolved());

    completer.complete(sample());
    assert_eq!(handle.try_result(), Some(Ok(sample())));
    // The result stays available after the completer is gone.
    assert_eq!(handle.try_result(), Some(Ok(sample())));
    assert_eq!(handle.wait(), Ok(sample()));
}

#[test]
fn test_handle_reports_failure() {
    let (completer, mut handle) = snapshot_handle(3);
    let failure = CheckpointFailure::new(3, CheckpointFailureReason::BarrierOutOfOrder, "late");
    completer.fail(failure.clone());
    assert_eq!(
        handle.wait_timeout(Duration::from_millis(10)),
        Some(Err(failure))
    );
}

#[test]
fn test_dropped_completer_fails_with_task_closing() {
    let (completer, mut handle) = snapshot_handle(4);
    assert!(handle.wait_timeout(Duration::from_millis(1)).is_none());
    drop(completer);
    let err = handle.wait().unwrap_err();
    assert_eq!(err.checkpoint_id, 4);
    assert_eq!(err.reason, CheckpointFailureReason::TaskClosing);
}

#[test]
fn test_wait_from_another_thread() {
    let (completer, handle) = snapshot_handle(8);
    let waiter = std::thread::spawn(move || handle.wait());
    completer.complete(ChannelStateSnapshot::new(8, BTreeMap::new()));
    let snapshot = waiter.join().unwrap().unwrap();
    assert_eq!(snapshot.checkpoint_id, 8);
}
