//! Owner of the live bus collection and the per-bus timing cache.
//!
//! All state lives behind one mutex that is only held for short synchronous
//! sections, never across an `.await`. That makes "is this id in flight?"
//! followed by "mark it in flight" a single step, so two concurrent lookups
//! for the same bus cannot both reach the network. In-flight marks and the
//! loading flag are released by drop guards, so an operation that is
//! cancelled mid-request leaves nothing behind.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::filter::BusFilter;
use crate::services::bus_feed::BusFeed;
use crate::timing::TimingStatus;

#[derive(Debug, Clone, Copy)]
struct CachedTimingStatus {
    status: TimingStatus,
    fetched_at: DateTime<Utc>,
}

impl CachedTimingStatus {
    fn is_stale(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.fetched_at > ttl
    }
}

#[derive(Default)]
struct State {
    buses: Vec<Bus>,
    timing_cache: HashMap<String, CachedTimingStatus>,
    in_flight: HashSet<String>,
    is_loading: bool,
    error_message: Option<String>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a call to [`TrackingCoordinator::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The collection was replaced and `evicted` timing entries were pruned.
    Updated { buses: usize, evicted: usize },
    /// Another refresh was already running; nothing happened.
    AlreadyRunning,
    /// The feed failed; the previous collection is kept and the error is
    /// available from [`TrackingCoordinator::error_message`].
    Failed,
}

/// What a call to [`TrackingCoordinator::fetch_timing_status`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingLookup {
    /// A fresh entry was already cached.
    Cached,
    /// A lookup for this bus is already running. The caller gets nothing
    /// back from this call and has to read the cache later.
    InFlight,
    /// The bus has neither a journey code nor a vehicle ref; an unknown
    /// status was cached without touching the network.
    NoReference,
    Fetched,
    /// The request failed; an unknown status was cached and the error recorded.
    Failed,
}

/// Holds the current buses and answers timing lookups through a TTL cache.
pub struct TrackingCoordinator<F> {
    feed: F,
    clock: Arc<dyn Clock>,
    timing_ttl: TimeDelta,
    state: Mutex<State>,
}

impl<F: BusFeed> TrackingCoordinator<F> {
    pub fn new(feed: F, config: &TrackerConfig) -> Self {
        Self::with_clock(feed, config, Arc::new(SystemClock))
    }

    pub fn with_clock(feed: F, config: &TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            feed,
            clock,
            timing_ttl: TimeDelta::from_std(config.timing_ttl).unwrap_or(TimeDelta::MAX),
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Replaces the bus collection with the feed's current contents.
    ///
    /// On success, timing entries for buses that disappeared and entries
    /// older than the TTL are dropped. Overlapping calls return
    /// [`RefreshOutcome::AlreadyRunning`] immediately.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_loading) = LoadingGuard::acquire(&self.state) else {
            debug!("Refresh already running, skipping");
            return RefreshOutcome::AlreadyRunning;
        };

        match self.feed.fetch_buses().await {
            Ok(buses) => {
                let now = self.clock.now();
                let ttl = self.timing_ttl;
                let mut state = self.state();

                let current: HashSet<&str> = buses.iter().map(Bus::id).collect();
                let before = state.timing_cache.len();
                state
                    .timing_cache
                    .retain(|id, cached| current.contains(id.as_str()) && !cached.is_stale(now, ttl));
                let evicted = before - state.timing_cache.len();
                drop(current);

                let count = buses.len();
                state.buses = buses;
                state.error_message = None;
                info!(buses = count, evicted, "Bus list refreshed");
                RefreshOutcome::Updated {
                    buses: count,
                    evicted,
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Bus list refresh failed");
                self.state().error_message = Some(message);
                RefreshOutcome::Failed
            }
        }
    }

    /// Cached timing status for `bus_id`, if present and within the TTL.
    /// A stale entry is evicted on the way out.
    pub fn timing_status(&self, bus_id: &str) -> Option<TimingStatus> {
        let now = self.clock.now();
        let mut state = self.state();
        let cached = *state.timing_cache.get(bus_id)?;
        if cached.is_stale(now, self.timing_ttl) {
            state.timing_cache.remove(bus_id);
            return None;
        }
        Some(cached.status)
    }

    /// Looks up and caches the timing status for `bus`.
    ///
    /// The journey code is preferred over the vehicle ref as the lookup key.
    /// Failures cache an unknown status so the bus is not retried until the
    /// entry expires, and set the error message.
    pub async fn fetch_timing_status(&self, bus: &Bus) -> TimingLookup {
        let id = bus.id();
        let code = bus.journey_code.as_deref().or(bus.vehicle_ref.as_deref());

        let (_in_flight, code) = {
            let now = self.clock.now();
            let mut state = self.state();

            let fresh = state
                .timing_cache
                .get(id)
                .is_some_and(|cached| !cached.is_stale(now, self.timing_ttl));
            if fresh {
                return TimingLookup::Cached;
            }
            if state.in_flight.contains(id) {
                debug!(bus_id = id, "Timing lookup already in flight");
                return TimingLookup::InFlight;
            }
            let Some(code) = code else {
                state.timing_cache.insert(
                    id.to_string(),
                    CachedTimingStatus {
                        status: TimingStatus::UNKNOWN,
                        fetched_at: now,
                    },
                );
                return TimingLookup::NoReference;
            };

            state.in_flight.insert(id.to_string());
            let guard = InFlightGuard {
                state: &self.state,
                id: id.to_string(),
            };
            (guard, code)
        };

        let result = self.feed.fetch_timing_status(code).await;

        let now = self.clock.now();
        let mut state = self.state();
        let (status, outcome) = match result {
            Ok(status) => (status.unwrap_or(TimingStatus::UNKNOWN), TimingLookup::Fetched),
            Err(e) => {
                let message = format!("{e:#}");
                warn!(bus_id = id, journey_code = code, error = %message, "Timing lookup failed");
                state.error_message = Some(message);
                (TimingStatus::UNKNOWN, TimingLookup::Failed)
            }
        };
        state.timing_cache.insert(
            id.to_string(),
            CachedTimingStatus {
                status,
                fetched_at: now,
            },
        );
        // release the lock before the in-flight guard takes it again
        drop(state);
        outcome
    }

    /// Snapshot of the current collection.
    pub fn buses(&self) -> Vec<Bus> {
        self.state().buses.clone()
    }

    pub fn bus(&self, bus_id: &str) -> Option<Bus> {
        self.state().buses.iter().find(|b| b.id() == bus_id).cloned()
    }

    /// The current collection narrowed and ordered by `filter`.
    pub fn filtered_buses(&self, filter: &BusFilter) -> Vec<Bus> {
        filter.apply(&self.state().buses)
    }

    /// Distinct route labels of the current collection, sorted for display.
    pub fn routes(&self) -> Vec<String> {
        crate::filter::route_labels(&self.state().buses)
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading
    }

    pub fn is_timing_in_flight(&self, bus_id: &str) -> bool {
        self.state().in_flight.contains(bus_id)
    }

    pub fn error_message(&self) -> Option<String> {
        self.state().error_message.clone()
    }

    pub fn clear_error(&self) {
        self.state().error_message = None;
    }
}

impl<F: BusFeed + 'static> TrackingCoordinator<F> {
    /// Spawns a task that refreshes immediately and then every `interval`.
    ///
    /// The task stops at its next sleep once [`RefreshLoop::stop`] is called
    /// or the handle is dropped. Start a new loop to resume.
    pub fn start_refresh_loop(self: &Arc<Self>, interval: Duration) -> RefreshLoop {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let tracker = Arc::clone(self);

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Refresh loop started");
            while !*stop_rx.borrow() {
                tracker.refresh().await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            info!("Refresh loop stopped");
        });

        RefreshLoop {
            stop: stop_tx,
            handle,
        }
    }
}

/// Handle to a running refresh loop.
pub struct RefreshLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefreshLoop {
    /// Signals the loop and waits for it to finish its current iteration.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Refresh loop task ended abnormally");
        }
    }
}

struct LoadingGuard<'a>(&'a Mutex<State>);

impl<'a> LoadingGuard<'a> {
    fn acquire(state: &'a Mutex<State>) -> Option<Self> {
        let mut guard = lock(state);
        if guard.is_loading {
            return None;
        }
        guard.is_loading = true;
        drop(guard);
        Some(Self(state))
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).is_loading = false;
    }
}

struct InFlightGuard<'a> {
    state: &'a Mutex<State>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::make_bus;
    use crate::clock::ManualClock;
    use anyhow::{Result, anyhow};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeFeed {
        buses: Mutex<Vec<Bus>>,
        fail_buses: AtomicBool,
        bus_calls: AtomicUsize,
        timing: Mutex<Option<TimingStatus>>,
        fail_timing: AtomicBool,
        hang_timing: AtomicBool,
        timing_codes: Mutex<Vec<String>>,
    }

    impl FakeFeed {
        fn timing_calls(&self) -> usize {
            self.timing_codes.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl BusFeed for Arc<FakeFeed> {
        async fn fetch_buses(&self) -> Result<Vec<Bus>> {
            self.bus_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_buses.load(Ordering::SeqCst) {
                return Err(anyhow!("feed returned 503"));
            }
            Ok(self.buses.lock().unwrap().clone())
        }

        async fn fetch_timing_status(&self, journey_code: &str) -> Result<Option<TimingStatus>> {
            self.timing_codes.lock().unwrap().push(journey_code.to_string());
            tokio::task::yield_now().await;
            if self.hang_timing.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail_timing.load(Ordering::SeqCst) {
                return Err(anyhow!("vehicle endpoint timed out"));
            }
            Ok(*self.timing.lock().unwrap())
        }
    }

    const ON_TIME: TimingStatus = TimingStatus {
        minutes: Some(0),
        status: Some(0),
    };

    fn setup(ttl_secs: u64) -> (Arc<FakeFeed>, Arc<ManualClock>, TrackingCoordinator<Arc<FakeFeed>>) {
        let feed = Arc::new(FakeFeed::default());
        *feed.timing.lock().unwrap() = Some(ON_TIME);
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_761_640_899, 0).unwrap(),
        ));
        let config = TrackerConfig {
            timing_ttl: Duration::from_secs(ttl_secs),
            ..TrackerConfig::default()
        };
        let tracker = TrackingCoordinator::with_clock(feed.clone(), &config, clock.clone());
        (feed, clock, tracker)
    }

    fn bus(vehicle: &str, journey: &str) -> Bus {
        make_bus(json!({ "VehicleRef": vehicle, "JourneyCode": journey }))
    }

    #[tokio::test]
    async fn test_refresh_replaces_collection() {
        let (feed, _, tracker) = setup(300);
        let first = bus("GC-1", "J1");
        *feed.buses.lock().unwrap() = vec![first.clone()];

        let outcome = tracker.refresh().await;

        assert_eq!(outcome, RefreshOutcome::Updated { buses: 1, evicted: 0 });
        assert_eq!(tracker.buses(), vec![first.clone()]);
        assert_eq!(tracker.bus(first.id()), Some(first));
        assert_eq!(tracker.error_message(), None);
        assert!(!tracker.is_loading());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_buses_and_sets_error() {
        let (feed, _, tracker) = setup(300);
        *feed.buses.lock().unwrap() = vec![bus("GC-1", "J1")];
        tracker.refresh().await;

        feed.fail_buses.store(true, Ordering::SeqCst);
        assert_eq!(tracker.refresh().await, RefreshOutcome::Failed);

        assert_eq!(tracker.buses().len(), 1);
        assert_eq!(tracker.error_message().as_deref(), Some("feed returned 503"));
        assert!(!tracker.is_loading());

        feed.fail_buses.store(false, Ordering::SeqCst);
        tracker.refresh().await;
        assert_eq!(tracker.error_message(), None);
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_suppressed() {
        let (feed, _, tracker) = setup(300);

        let (first, second) = tokio::join!(tracker.refresh(), tracker.refresh());

        assert!(matches!(first, RefreshOutcome::Updated { .. }));
        assert_eq!(second, RefreshOutcome::AlreadyRunning);
        assert_eq!(feed.bus_calls.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_loading());
    }

    #[tokio::test]
    async fn test_fetch_timing_status_caches_result() {
        let (feed, _, tracker) = setup(300);
        let b = bus("GC-1", "JC123");

        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Fetched);
        assert_eq!(tracker.timing_status(b.id()), Some(ON_TIME));
        assert_eq!(*feed.timing_codes.lock().unwrap(), ["JC123"]);

        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Cached);
        assert_eq!(feed.timing_calls(), 1);
    }

    #[tokio::test]
    async fn test_vehicle_ref_is_used_without_journey_code() {
        let (feed, _, tracker) = setup(300);
        let b = make_bus(json!({ "VehicleRef": "GC-7" }));

        tracker.fetch_timing_status(&b).await;

        assert_eq!(*feed.timing_codes.lock().unwrap(), ["GC-7"]);
    }

    #[tokio::test]
    async fn test_absent_timing_block_caches_unknown() {
        let (feed, _, tracker) = setup(300);
        *feed.timing.lock().unwrap() = None;
        let b = bus("GC-1", "J1");

        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Fetched);
        assert_eq!(tracker.timing_status(b.id()), Some(TimingStatus::UNKNOWN));
    }

    #[tokio::test]
    async fn test_no_reference_caches_unknown_without_network() {
        let (feed, _, tracker) = setup(300);
        let b = make_bus(json!({ "VehicleRef": null, "JourneyCode": null }));

        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::NoReference);

        assert_eq!(feed.timing_calls(), 0);
        assert_eq!(tracker.timing_status(b.id()), Some(TimingStatus::UNKNOWN));
        assert_eq!(tracker.error_message(), None);
    }

    #[tokio::test]
    async fn test_failed_lookup_caches_unknown_and_sets_error() {
        let (feed, _, tracker) = setup(300);
        feed.fail_timing.store(true, Ordering::SeqCst);
        let b = bus("GC-1", "J1");

        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Failed);

        assert_eq!(tracker.timing_status(b.id()), Some(TimingStatus::UNKNOWN));
        assert_eq!(tracker.error_message().as_deref(), Some("vehicle endpoint timed out"));
        assert!(!tracker.is_timing_in_flight(b.id()));

        // the failure is cached too
        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Cached);
        assert_eq!(feed.timing_calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_ttl() {
        let (_, clock, tracker) = setup(10);
        let b = bus("GC-1", "J1");
        tracker.fetch_timing_status(&b).await;

        clock.advance(TimeDelta::seconds(9));
        assert_eq!(tracker.timing_status(b.id()), Some(ON_TIME));

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(tracker.timing_status(b.id()), Some(ON_TIME));

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(tracker.timing_status(b.id()), None);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let (feed, clock, tracker) = setup(10);
        let b = bus("GC-1", "J1");
        tracker.fetch_timing_status(&b).await;

        clock.advance(TimeDelta::seconds(11));
        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Fetched);
        assert_eq!(feed.timing_calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_prunes_removed_and_expired_entries() {
        let (feed, clock, tracker) = setup(10);
        let kept = bus("GC-1", "J1");
        let removed = bus("GC-2", "J2");
        let expired = bus("GC-3", "J3");
        *feed.buses.lock().unwrap() = vec![kept.clone(), removed.clone(), expired.clone()];
        tracker.refresh().await;

        tracker.fetch_timing_status(&expired).await;
        clock.advance(TimeDelta::seconds(8));
        tracker.fetch_timing_status(&kept).await;
        tracker.fetch_timing_status(&removed).await;
        clock.advance(TimeDelta::seconds(3));

        *feed.buses.lock().unwrap() = vec![kept.clone(), expired.clone()];
        let outcome = tracker.refresh().await;

        assert_eq!(outcome, RefreshOutcome::Updated { buses: 2, evicted: 2 });
        assert_eq!(tracker.timing_status(kept.id()), Some(ON_TIME));
        assert_eq!(tracker.timing_status(removed.id()), None);
        assert_eq!(tracker.timing_status(expired.id()), None);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_request() {
        let (feed, _, tracker) = setup(300);
        let b = bus("GC-1", "J1");

        let (first, second) =
            tokio::join!(tracker.fetch_timing_status(&b), tracker.fetch_timing_status(&b));

        assert_eq!(first, TimingLookup::Fetched);
        assert_eq!(second, TimingLookup::InFlight);
        assert_eq!(feed.timing_calls(), 1);
        assert!(!tracker.is_timing_in_flight(b.id()));
    }

    #[tokio::test]
    async fn test_lookups_for_different_buses_are_independent() {
        let (feed, _, tracker) = setup(300);
        let a = bus("GC-1", "J1");
        let b = bus("GC-2", "J2");

        let (first, second) =
            tokio::join!(tracker.fetch_timing_status(&a), tracker.fetch_timing_status(&b));

        assert_eq!((first, second), (TimingLookup::Fetched, TimingLookup::Fetched));
        assert_eq!(feed.timing_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_lookup_releases_in_flight_mark() {
        let (feed, _, tracker) = setup(300);
        feed.hang_timing.store(true, Ordering::SeqCst);
        let b = bus("GC-1", "J1");

        let timed_out =
            tokio::time::timeout(Duration::from_secs(1), tracker.fetch_timing_status(&b)).await;
        assert!(timed_out.is_err());

        assert!(!tracker.is_timing_in_flight(b.id()));
        assert_eq!(tracker.timing_status(b.id()), None);

        feed.hang_timing.store(false, Ordering::SeqCst);
        assert_eq!(tracker.fetch_timing_status(&b).await, TimingLookup::Fetched);
        assert_eq!(feed.timing_calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_error() {
        let (feed, _, tracker) = setup(300);
        feed.fail_buses.store(true, Ordering::SeqCst);
        tracker.refresh().await;
        assert!(tracker.error_message().is_some());

        tracker.clear_error();
        assert_eq!(tracker.error_message(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_polls_until_stopped() {
        let (feed, _, tracker) = setup(300);
        let tracker = Arc::new(tracker);

        let refresh_loop = tracker.start_refresh_loop(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(65)).await;
        refresh_loop.stop().await;

        let calls = feed.bus_calls.load(Ordering::SeqCst);
        assert_eq!(calls, 3);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(feed.bus_calls.load(Ordering::SeqCst), calls);
        assert!(!tracker.is_loading());

        // resuming starts a fresh loop
        let refresh_loop = tracker.start_refresh_loop(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        refresh_loop.stop().await;
        assert_eq!(feed.bus_calls.load(Ordering::SeqCst), calls + 1);
    }
}
