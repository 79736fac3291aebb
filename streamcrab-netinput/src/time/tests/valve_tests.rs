use super::*;

fn wm(ts: EventTime) -> Option<ValveOutput> {
    Some(ValveOutput::Watermark(Watermark::new(ts)))
}

#[test]
fn test_single_channel_advances() {
    let mut valve = StatusWatermarkValve::new(1);
    assert_eq!(valve.input_watermark(0, Watermark::new(1_000)), wm(1_000));
    // Older and equal values are dropped.
    assert_eq!(valve.input_watermark(0, Watermark::new(500)), None);
    assert_eq!(valve.input_watermark(0, Watermark::new(1_000)), None);
    assert_eq!(valve.channel_watermark(0), Some(1_000));
    assert_eq!(valve.input_watermark(0, Watermark::new(2_000)), wm(2_000));
}

#[test]
fn test_min_over_channels() {
    let mut valve = StatusWatermarkValve::new(2);
    // Channel 1 has not reported yet.
    assert_eq!(valve.input_watermark(0, Watermark::new(1_000)), None);
    assert_eq!(valve.input_watermark(1, Watermark::new(500)), wm(500));
    assert_eq!(valve.input_watermark(1, Watermark::new(2_000)), wm(1_000));
    assert_eq!(valve.input_watermark(0, Watermark::new(1_500)), wm(1_500));
    assert_eq!(valve.last_output_watermark(), 1_500);
}

#[test]
fn test_unknown_slot_is_ignored() {
    let mut valve = StatusWatermarkValve::new(1);
    assert_eq!(valve.input_watermark(3, Watermark::new(1)), None);
    assert_eq!(valve.input_watermark_status(3, WatermarkStatus::Idle), None);
    assert_eq!(valve.channel_watermark(3), None);
}

#[test]
fn test_idle_channel_excluded_from_min() {
    let mut valve = StatusWatermarkValve::new(3);
    valve.input_watermark(0, Watermark::new(100));
    valve.input_watermark(1, Watermark::new(100));
    assert_eq!(valve.input_watermark(2, Watermark::new(100)), wm(100));

    // Channel 2 goes idle; the others move past its value.
    assert_eq!(valve.input_watermark_status(2, WatermarkStatus::Idle), None);
    assert_eq!(valve.input_watermark(0, Watermark::new(900)), None);
    assert_eq!(valve.input_watermark(1, Watermark::new(700)), wm(700));
}

#[test]
fn test_going_idle_releases_held_back_watermark() {
    let mut valve = StatusWatermarkValve::new(2);
    valve.input_watermark(0, Watermark::new(50));
    assert_eq!(valve.input_watermark(1, Watermark::new(10)), wm(10));
    // Excluding the slow channel lets the minimum jump.
    assert_eq!(valve.input_watermark_status(1, WatermarkStatus::Idle), wm(50));
}

#[test]
fn test_stale_reactivation_does_not_regress() {
    let mut valve = StatusWatermarkValve::new(2);
    valve.input_watermark(0, Watermark::new(100));
    valve.input_watermark(1, Watermark::new(100));
    valve.input_watermark_status(1, WatermarkStatus::Idle);
    assert_eq!(valve.input_watermark(0, Watermark::new(1_000)), wm(1_000));

    // Back with an old watermark: nothing lower is emitted, and channel 1 now
    // holds back the minimum until it catches up.
    assert_eq!(valve.input_watermark_status(1, WatermarkStatus::Active), None);
    assert_eq!(valve.input_watermark(0, Watermark::new(2_000)), None);
    assert_eq!(valve.input_watermark(1, Watermark::new(400)), None);
    assert_eq!(valve.input_watermark(1, Watermark::new(1_500)), wm(1_500));
    assert_eq!(valve.last_output_watermark(), 1_500);
}

#[test]
fn test_all_idle_emits_idle_status_once() {
    let mut valve = StatusWatermarkValve::new(2);
    assert_eq!(valve.input_watermark_status(0, WatermarkStatus::Idle), None);
    assert_eq!(
        valve.input_watermark_status(1, WatermarkStatus::Idle),
        Some(ValveOutput::Status(WatermarkStatus::Idle))
    );
    assert!(valve.is_idle());
    // Repeated status is a no-op.
    assert_eq!(valve.input_watermark_status(1, WatermarkStatus::Idle), None);

    // Watermarks on idle channels are remembered but not emitted.
    assert_eq!(valve.input_watermark(0, Watermark::new(300)), None);
    assert_eq!(valve.channel_watermark(0), Some(300));

    assert_eq!(
        valve.input_watermark_status(0, WatermarkStatus::Active),
        Some(ValveOutput::Status(WatermarkStatus::Active))
    );
    assert!(!valve.is_idle());
    assert_eq!(valve.take_pending(), Some(Watermark::new(300)));
    assert_eq!(valve.take_pending(), None);
    assert_eq!(valve.input_watermark(0, Watermark::new(400)), wm(400));
}

#[test]
fn test_reactivation_releases_watermark_stored_while_idle() {
    let mut valve = StatusWatermarkValve::new(1);
    assert_eq!(valve.input_watermark(0, Watermark::new(10)), wm(10));
    assert_eq!(
        valve.input_watermark_status(0, WatermarkStatus::Idle),
        Some(ValveOutput::Status(WatermarkStatus::Idle))
    );
    assert_eq!(valve.input_watermark(0, Watermark::new(100)), None);

    assert_eq!(
        valve.input_watermark_status(0, WatermarkStatus::Active),
        Some(ValveOutput::Status(WatermarkStatus::Active))
    );
    assert_eq!(valve.take_pending(), Some(Watermark::new(100)));
    assert_eq!(valve.last_output_watermark(), 100);
    // Resending the same value does not emit it twice.
    assert_eq!(valve.input_watermark(0, Watermark::new(100)), None);
}

#[test]
fn test_reactivation_without_progress_holds_nothing() {
    let mut valve = StatusWatermarkValve::new(1);
    valve.input_watermark(0, Watermark::new(10));
    valve.input_watermark_status(0, WatermarkStatus::Idle);
    valve.input_watermark_status(0, WatermarkStatus::Active);
    assert_eq!(valve.take_pending(), None);
    assert_eq!(valve.last_output_watermark(), 10);
}

#[test]
fn test_newer_watermark_supersedes_held_one() {
    let mut valve = StatusWatermarkValve::new(1);
    valve.input_watermark_status(0, WatermarkStatus::Idle);
    valve.input_watermark(0, Watermark::new(50));
    valve.input_watermark_status(0, WatermarkStatus::Active);
    assert_eq!(valve.input_watermark(0, Watermark::new(60)), wm(60));
    assert_eq!(valve.take_pending(), None);
}

#[test]
fn test_end_of_channel_excludes_channel() {
    let mut valve = StatusWatermarkValve::new(2);
    valve.input_watermark(0, Watermark::new(900));
    assert_eq!(valve.input_watermark(1, Watermark::new(100)), wm(100));
    assert_eq!(valve.input_end_of_channel(1), wm(900));
    // Finished channels ignore further input.
    assert_eq!(valve.input_watermark(1, Watermark::new(5_000)), None);
    assert_eq!(valve.input_end_of_channel(1), None);
    // Last channel ending produces nothing.
    assert_eq!(valve.input_end_of_channel(0), None);
}

#[test]
fn test_end_of_last_active_channel_goes_idle() {
    let mut valve = StatusWatermarkValve::new(2);
    valve.input_watermark_status(0, WatermarkStatus::Idle);
    assert_eq!(
        valve.input_end_of_channel(1),
        Some(ValveOutput::Status(WatermarkStatus::Idle))
    );
}

#[test]
fn test_emitted_watermarks_never_decrease() {
    let mut valve = StatusWatermarkValve::new(3);
    let updates: [(usize, i64); 12] = [
        (0, 5),
        (1, 3),
        (2, 8),
        (1, 2),
        (0, 12),
        (1, 9),
        (2, 4),
        (2, 20),
        (1, 30),
        (0, 25),
        (0, 11),
        (2, 40),
    ];
    let mut emitted = Vec::new();
    for (step, (slot, ts)) in updates.into_iter().enumerate() {
        if step == 6 {
            valve.input_watermark_status(1, WatermarkStatus::Idle);
        }
        if step == 9 {
            valve.input_watermark_status(1, WatermarkStatus::Active);
        }
        let output = valve.input_watermark(slot, Watermark::new(ts));
        if let Some(ValveOutput::Watermark(watermark)) = output {
            let active_min = (0..3)
                .filter(|slot| valve.channel_status(*slot) == Some(WatermarkStatus::Active))
                .filter_map(|slot| valve.channel_watermark(slot))
                .min()
                .unwrap();
            assert!(watermark.timestamp <= active_min);
            emitted.push(watermark.timestamp);
        }
    }
    assert!(!emitted.is_empty());
    assert!(emitted.windows(2).all(|pair| pair[0] < pair[1]));
}
