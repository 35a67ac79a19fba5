//! Tests for the observation scheduler timers, with the tokio clock paused.

use broute_rs::constants::{EOJ_SMART_METER, EPC_CUMULATIVE_ENERGY_NORMAL, EPC_INSTANTANEOUS_POWER, EPC_MANUFACTURER_CODE};
use broute_rs::{ObservationScheduler, PollDecision, PollKey};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

const METER: &str = "FE80:0000:0000:0000:021C:6400:03EF:EDFD";

fn key(epc: u8) -> PollKey {
    PollKey {
        address: METER.to_string(),
        object: EOJ_SMART_METER.into(),
        epc,
    }
}

/// Tests that every observed property gets its own timer.
#[tokio::test(start_paused = true)]
async fn test_one_timer_per_property() {
    let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
    let epcs = [EPC_INSTANTANEOUS_POWER, EPC_CUMULATIVE_ENERGY_NORMAL, EPC_MANUFACTURER_CODE];
    assert!(scheduler.start(METER, EOJ_SMART_METER.into(), &epcs, Duration::from_secs(2)));
    assert_eq!(scheduler.pending(), 3);
    assert_eq!(scheduler.base_interval(), Duration::from_secs(2));

    let started = Instant::now();
    let mut fired = HashSet::new();
    for _ in 0..3 {
        fired.insert(rx.recv().await.unwrap().key.epc);
    }
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(fired, epcs.into_iter().collect::<HashSet<_>>());
}

/// Tests that starting twice keeps the first set of timers.
#[tokio::test(start_paused = true)]
async fn test_start_while_running_is_refused() {
    let (mut scheduler, _rx) = ObservationScheduler::new(Duration::ZERO);
    assert!(scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER], Duration::from_secs(1)));
    assert!(!scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE8, 0xEA], Duration::from_secs(5)));
    assert_eq!(scheduler.pending(), 1);
    assert_eq!(scheduler.base_interval(), Duration::from_secs(1));
}

/// Tests that a static property with a cached value is skipped but stays scheduled.
#[tokio::test(start_paused = true)]
async fn test_static_skip_rearms() {
    let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
    scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_MANUFACTURER_CODE], Duration::from_secs(1));

    let fired = rx.recv().await.unwrap();
    assert_eq!(scheduler.on_fired(fired, true), PollDecision::Skip(key(EPC_MANUFACTURER_CODE)));
    assert_eq!(scheduler.pending(), 1);

    let fired = rx.recv().await.unwrap();
    assert_eq!(scheduler.on_fired(fired, false), PollDecision::Issue(key(EPC_MANUFACTURER_CODE)));
}

/// Tests that a dynamic property is polled even when a value is cached.
#[tokio::test(start_paused = true)]
async fn test_dynamic_property_always_issued() {
    let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
    scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER], Duration::from_secs(1));

    let fired = rx.recv().await.unwrap();
    assert_eq!(scheduler.on_fired(fired, true), PollDecision::Issue(key(EPC_INSTANTANEOUS_POWER)));
}

/// Tests that stop cancels every timer, is idempotent and allows a restart.
#[tokio::test(start_paused = true)]
async fn test_stop_and_restart() {
    let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
    scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER, 0xE8], Duration::from_secs(1));

    scheduler.stop();
    scheduler.stop();
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.pending(), 0);
    assert!(tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.is_err());

    assert!(scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER], Duration::from_secs(1)));
    assert_eq!(rx.recv().await.unwrap().key, key(EPC_INSTANTANEOUS_POWER));
}

/// Tests that a poll fired just before stop cannot be issued after a later start.
#[tokio::test(start_paused = true)]
async fn test_poll_queued_before_stop_is_dropped_after_restart() {
    let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
    scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER, 0xE8], Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(2)).await;
    scheduler.stop();
    scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER], Duration::from_secs(10));

    for _ in 0..2 {
        let queued = rx.recv().await.unwrap();
        assert_eq!(scheduler.on_fired(queued, false), PollDecision::Stale);
    }
    assert_eq!(scheduler.pending(), 1);

    let started = Instant::now();
    let fired = rx.recv().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(scheduler.on_fired(fired, false), PollDecision::Issue(key(EPC_INSTANTANEOUS_POWER)));
}

/// Tests that the first firing is also delayed by base plus jitter.
#[tokio::test(start_paused = true)]
async fn test_first_firing_is_jittered() {
    let dispersion = Duration::from_millis(2_000);
    let base = Duration::from_millis(500);
    let (mut scheduler, mut rx) = ObservationScheduler::new(dispersion);
    scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER], base);

    let started = Instant::now();
    rx.recv().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= base, "{elapsed:?}");
    assert!(elapsed <= base + dispersion, "{elapsed:?}");
}
