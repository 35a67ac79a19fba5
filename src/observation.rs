//! # Observation Scheduler
//!
//! Recurring, jittered polling of a set of properties. Each poll key owns one
//! timer task; when it fires the key is sent back to the driver, which decides
//! whether to issue the GET and then re-arms the key with a fresh delay of
//! `base + uniform(0..=dispersion)`.
//!
//! Every arming is numbered. A firing is only honoured while its number is
//! the key's current one, so a firing still queued from before a `stop` or
//! an earlier arming is dropped.
//!
//! Properties in [`STATIC_EPCS`] are only fetched while nothing is cached for
//! them. A skipped poll is still re-armed so that a registry reset is picked
//! up without restarting observation.

use crate::constants::STATIC_EPCS;
use crate::echonet::object::Eoj;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Identifies one observed property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    pub address: String,
    pub object: Eoj,
    pub epc: u8,
}

impl fmt::Display for PollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:02X}", self.address, self.object, self.epc)
    }
}

/// A key sent back by its timer, tagged with the arming it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredPoll {
    pub key: PollKey,
    arm: u64,
}

#[derive(Debug)]
struct Timer {
    handle: JoinHandle<()>,
    arm: u64,
}

/// What to do with a fired poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// Send a GET for the key
    Issue(PollKey),
    /// Value is static and already known
    Skip(PollKey),
    /// Observation was stopped or the key re-armed after the timer fired
    Stale,
}

#[derive(Debug)]
pub struct ObservationScheduler {
    timers: HashMap<PollKey, Timer>,
    fired: UnboundedSender<FiredPoll>,
    arms: u64,
    base: Duration,
    dispersion: Duration,
    running: bool,
}

impl ObservationScheduler {
    /// Creates a stopped scheduler and the channel its timers fire into.
    pub fn new(dispersion: Duration) -> (Self, UnboundedReceiver<FiredPoll>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = ObservationScheduler {
            timers: HashMap::new(),
            fired,
            arms: 0,
            base: Duration::ZERO,
            dispersion,
            running: false,
        };
        (scheduler, rx)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    pub fn base_interval(&self) -> Duration {
        self.base
    }

    /// Arms one poll per property. Returns false if already running.
    pub fn start(&mut self, address: &str, object: Eoj, epcs: &[u8], base: Duration) -> bool {
        if self.running {
            debug!("observation already running");
            return false;
        }
        if epcs.is_empty() {
            warn!("observation started without properties");
        }

        info!("start observation of {} properties every {:?} (+{:?})", epcs.len(), base, self.dispersion);
        self.running = true;
        self.base = base;
        for &epc in epcs {
            self.arm(PollKey {
                address: address.to_string(),
                object,
                epc,
            });
        }
        true
    }

    /// Handles a key sent by its timer and re-arms it.
    ///
    /// `cached` tells whether the registry already holds a value for the key.
    pub fn on_fired(&mut self, fired: FiredPoll, cached: bool) -> PollDecision {
        let current = self.timers.get(&fired.key).is_some_and(|t| t.arm == fired.arm);
        if !self.running || !current {
            debug!("stale poll {} dropped", fired.key);
            return PollDecision::Stale;
        }

        let key = fired.key;
        self.arm(key.clone());
        if cached && STATIC_EPCS.contains(&key.epc) {
            debug!("poll {} skipped, static value known", key);
            PollDecision::Skip(key)
        } else {
            PollDecision::Issue(key)
        }
    }

    /// Cancels every pending poll. Idempotent.
    pub fn stop(&mut self) {
        if self.running {
            info!("stop observation");
        }
        self.running = false;
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }

    /// Delay before the next firing of a key.
    pub fn next_delay(&self) -> Duration {
        let spread = self.dispersion.as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        self.base + Duration::from_millis(jitter)
    }

    fn arm(&mut self, key: PollKey) {
        let delay = self.next_delay();
        self.arms = self.arms.wrapping_add(1);
        let arm = self.arms;
        let sender = self.fired.clone();
        let fired = FiredPoll { key: key.clone(), arm };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(fired);
        });
        if let Some(previous) = self.timers.insert(key, Timer { handle, arm }) {
            previous.handle.abort();
        }
    }
}

impl Drop for ObservationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EOJ_SMART_METER, EPC_INSTANTANEOUS_POWER, EPC_MANUFACTURER_CODE};
    use tokio::time::Instant;

    const METER: &str = "FE80:0000:0000:0000:021C:6400:03EF:EDFD";

    #[tokio::test(start_paused = true)]
    async fn test_without_dispersion_fires_at_base() {
        let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
        let started = Instant::now();
        assert!(scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_INSTANTANEOUS_POWER], Duration::from_millis(1000)));

        let fired = rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert!(matches!(scheduler.on_fired(fired, false), PollDecision::Issue(_)));

        let rearmed = Instant::now();
        let fired = rx.recv().await.unwrap();
        assert_eq!(rearmed.elapsed(), Duration::from_millis(1000));
        assert_eq!(fired.key.epc, EPC_INSTANTANEOUS_POWER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_within_dispersion() {
        let dispersion = Duration::from_millis(500);
        let (mut scheduler, mut rx) = ObservationScheduler::new(dispersion);
        let base = Duration::from_millis(1000);
        scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE7], base);

        for _ in 0..20 {
            let armed = Instant::now();
            let fired = rx.recv().await.unwrap();
            let elapsed = armed.elapsed();
            assert!(elapsed >= base && elapsed <= base + dispersion, "{elapsed:?}");
            scheduler.on_fired(fired, false);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_property_is_skipped_but_rearmed() {
        let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
        scheduler.start(METER, EOJ_SMART_METER.into(), &[EPC_MANUFACTURER_CODE, EPC_INSTANTANEOUS_POWER], Duration::from_secs(1));
        assert_eq!(scheduler.pending(), 2);

        for _ in 0..2 {
            let fired = rx.recv().await.unwrap();
            let key = fired.key.clone();
            let decision = scheduler.on_fired(fired, true);
            if key.epc == EPC_MANUFACTURER_CODE {
                assert_eq!(decision, PollDecision::Skip(key));
            } else {
                assert_eq!(decision, PollDecision::Issue(key));
            }
        }
        assert_eq!(scheduler.pending(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop() {
        let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
        assert!(scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE7, 0xE8], Duration::from_secs(1)));
        assert!(!scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE7, 0xE8, 0xEA], Duration::from_secs(1)));
        assert_eq!(scheduler.pending(), 2);

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_after_stop_is_stale() {
        let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
        scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE7], Duration::from_secs(1));
        let fired = rx.recv().await.unwrap();
        scheduler.stop();
        assert_eq!(scheduler.on_fired(fired, false), PollDecision::Stale);
    }

    /// Tests that a firing queued before a restart is dropped and leaves the new timer armed.
    #[tokio::test(start_paused = true)]
    async fn test_firing_queued_across_restart_is_stale() {
        let (mut scheduler, mut rx) = ObservationScheduler::new(Duration::ZERO);
        scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE7], Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        scheduler.stop();
        assert!(scheduler.start(METER, EOJ_SMART_METER.into(), &[0xE7], Duration::from_secs(1)));
        let restarted = Instant::now();

        let queued = rx.recv().await.unwrap();
        assert_eq!(restarted.elapsed(), Duration::ZERO);
        assert_eq!(scheduler.on_fired(queued, false), PollDecision::Stale);
        assert_eq!(scheduler.pending(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(restarted.elapsed(), Duration::from_secs(1));
        assert!(matches!(scheduler.on_fired(fired, false), PollDecision::Issue(_)));
    }
}
