//! The prayer schedule service.
//!
//! [`PrayerScheduleService`] owns the session state (acquired location, last
//! good timetable) and publishes a [`ScheduleSnapshot`] through a watch
//! channel. Derived entries are rebuilt from scratch on every publish.
//!
//! At most one refresh runs at a time. Periodic ticks that arrive while a
//! refresh is outstanding are skipped; manual refreshes get
//! [`Error::RefreshInProgress`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::location::{
    Coordinates, Geocoder, Location, LocationProvider, NominatimGeocoder, StaticLocator,
    DEFAULT_LOCATION_NAME,
};
use crate::schedule::{compute_next_prayer, PrayerEntry};
use crate::timetable::{AladhanClient, CalculationMethod, RawTimetable, TimetableProvider};

/// Where the service is in its per-session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Nothing has been attempted yet.
    #[default]
    Uninitialized,
    /// Waiting for a position fix.
    AcquiringLocation,
    /// No position could be obtained; only a manual refresh leaves this state.
    LocationFailed,
    /// A timetable request is outstanding.
    TimetableLoading,
    /// The schedule reflects a successful fetch.
    TimetableReady,
    /// The last fetch failed; entries come from the last good timetable, if any.
    TimetableFailed,
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::AcquiringLocation => write!(f, "acquiring location"),
            Self::LocationFailed => write!(f, "location failed"),
            Self::TimetableLoading => write!(f, "loading timetable"),
            Self::TimetableReady => write!(f, "ready"),
            Self::TimetableFailed => write!(f, "timetable failed"),
        }
    }
}

/// The published, read-only view of the schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleSnapshot {
    /// Lifecycle state.
    pub state: ScheduleState,
    /// Acquired location, once known.
    pub location: Option<Location>,
    /// Date of the timetable the entries were computed from.
    pub date: Option<NaiveDate>,
    /// Calculation method requested.
    pub method: CalculationMethod,
    /// The six entries in canonical order, or empty.
    pub entries: Vec<PrayerEntry>,
    /// Entries come from an older timetable because the latest fetch failed.
    pub stale: bool,
    /// User-facing description of the last failure.
    pub error: Option<String>,
    /// Wall-clock time the entries were computed.
    pub updated_at: Option<NaiveDateTime>,
    /// Incremented on every schedule publish (success or failure).
    pub generation: u64,
}

impl ScheduleSnapshot {
    /// Whether an operation is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(
            self.state,
            ScheduleState::AcquiringLocation | ScheduleState::TimetableLoading
        )
    }

    /// Whether the service is in an error state.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self.state,
            ScheduleState::LocationFailed | ScheduleState::TimetableFailed
        )
    }

    /// The entry flagged as next, if any.
    #[must_use]
    pub fn next_entry(&self) -> Option<&PrayerEntry> {
        self.entries.iter().find(|entry| entry.is_next)
    }
}

/// Result of a periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new schedule was published.
    Published,
    /// Nothing was done: a refresh was in flight or no location is held.
    Skipped,
}

/// Builder for [`PrayerScheduleService`].
pub struct ServiceBuilder {
    locator: Arc<dyn LocationProvider>,
    provider: Arc<dyn TimetableProvider>,
    geocoder: Option<Arc<dyn Geocoder>>,
    clock: Arc<dyn Clock>,
    method: CalculationMethod,
    location_name: Option<String>,
    fetch_timeout: Duration,
    refresh_interval: Duration,
}

impl std::fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("provider", &self.provider.name())
            .field("has_geocoder", &self.geocoder.is_some())
            .field("method", &self.method)
            .field("location_name", &self.location_name)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

impl ServiceBuilder {
    /// Start a builder with the two required collaborators.
    #[must_use]
    pub fn new(locator: Arc<dyn LocationProvider>, provider: Arc<dyn TimetableProvider>) -> Self {
        Self {
            locator,
            provider,
            geocoder: None,
            clock: Arc::new(SystemClock),
            method: CalculationMethod::default(),
            location_name: None,
            fetch_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(60),
        }
    }

    /// Wire up the production collaborators described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured coordinates are invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.fetch_timeout();
        let locator = StaticLocator::from_option(config.coordinates()?);
        let provider = AladhanClient::new(config.timetable.base_url.clone(), timeout);

        let mut builder = Self::new(Arc::new(locator), Arc::new(provider))
            .method(config.timetable.method)
            .fetch_timeout(timeout)
            .refresh_interval(config.refresh_interval());

        if let Some(name) = &config.location.name {
            builder = builder.location_name(name.clone());
        }
        if config.geocoding.enabled {
            builder = builder.geocoder(Arc::new(NominatimGeocoder::new(
                config.geocoding.base_url.clone(),
                &config.geocoding.user_agent,
                timeout,
            )));
        }
        Ok(builder)
    }

    /// Use a reverse geocoder for the place name.
    #[must_use]
    pub fn geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Use a custom clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Calculation method to request.
    #[must_use]
    pub fn method(mut self, method: CalculationMethod) -> Self {
        self.method = method;
        self
    }

    /// Fixed place label; skips geocoding.
    #[must_use]
    pub fn location_name(mut self, name: impl Into<String>) -> Self {
        self.location_name = Some(name.into());
        self
    }

    /// Bound on each location, geocode and timetable request.
    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Period of the background refresh.
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Build the service.
    #[must_use]
    pub fn build(self) -> PrayerScheduleService {
        let (snapshot, _) = watch::channel(ScheduleSnapshot {
            method: self.method,
            ..ScheduleSnapshot::default()
        });
        PrayerScheduleService {
            inner: Arc::new(Inner {
                locator: self.locator,
                provider: self.provider,
                geocoder: self.geocoder,
                clock: self.clock,
                method: self.method,
                location_name: self.location_name,
                fetch_timeout: self.fetch_timeout,
                refresh_interval: self.refresh_interval,
                location: Mutex::new(None),
                last_table: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                snapshot,
            }),
        }
    }
}

struct Inner {
    locator: Arc<dyn LocationProvider>,
    provider: Arc<dyn TimetableProvider>,
    geocoder: Option<Arc<dyn Geocoder>>,
    clock: Arc<dyn Clock>,
    method: CalculationMethod,
    location_name: Option<String>,
    fetch_timeout: Duration,
    refresh_interval: Duration,
    location: Mutex<Option<Location>>,
    last_table: Mutex<Option<RawTimetable>>,
    in_flight: AtomicBool,
    snapshot: watch::Sender<ScheduleSnapshot>,
}

/// Holds the single refresh slot; released on drop, including cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Keeps a "which prayer is next" schedule current for the user's location.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PrayerScheduleService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PrayerScheduleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrayerScheduleService")
            .field("provider", &self.inner.provider.name())
            .field("method", &self.inner.method)
            .field("state", &self.inner.snapshot.borrow().state)
            .finish_non_exhaustive()
    }
}

impl PrayerScheduleService {
    /// Start building a service.
    #[must_use]
    pub fn builder(
        locator: Arc<dyn LocationProvider>,
        provider: Arc<dyn TimetableProvider>,
    ) -> ServiceBuilder {
        ServiceBuilder::new(locator, provider)
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ScheduleSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScheduleSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// The location acquired this session, if any.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        lock(&self.inner.location).clone()
    }

    /// Initial load: acquire the location, then fetch and publish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LocationUnavailable`], [`Error::TimetableFetchFailed`],
    /// or [`Error::RefreshInProgress`] if another refresh holds the slot.
    pub async fn start(&self) -> Result<()> {
        let Some(_slot) = InFlight::try_acquire(&self.inner.in_flight) else {
            return Err(Error::RefreshInProgress);
        };
        self.locate().await?;
        self.load_timetable().await
    }

    /// Acquire (or re-acquire) the location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LocationUnavailable`] if no position could be
    /// obtained, or [`Error::RefreshInProgress`].
    pub async fn acquire_location(&self) -> Result<Location> {
        let Some(_slot) = InFlight::try_acquire(&self.inner.in_flight) else {
            return Err(Error::RefreshInProgress);
        };
        self.locate().await
    }

    /// One periodic refresh. Failures are returned for logging; the caller
    /// is expected not to surface them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimetableFetchFailed`] if the fetch failed.
    pub async fn tick(&self) -> Result<RefreshOutcome> {
        let Some(_slot) = InFlight::try_acquire(&self.inner.in_flight) else {
            debug!("Refresh already in flight, skipping tick");
            return Ok(RefreshOutcome::Skipped);
        };
        if self.location().is_none() {
            debug!("No location acquired, skipping tick");
            return Ok(RefreshOutcome::Skipped);
        }
        self.load_timetable().await?;
        Ok(RefreshOutcome::Published)
    }

    /// User-triggered refresh. Re-attempts location acquisition if no
    /// location is held.
    ///
    /// # Errors
    ///
    /// Returns the failure so the caller can show it, including
    /// [`Error::RefreshInProgress`].
    pub async fn refresh_now(&self) -> Result<()> {
        let Some(_slot) = InFlight::try_acquire(&self.inner.in_flight) else {
            return Err(Error::RefreshInProgress);
        };
        if self.location().is_none() {
            self.locate().await?;
        }
        self.load_timetable().await
    }

    /// Run the initial load and the periodic refresh until `shutdown` fires.
    ///
    /// Nothing is published once `shutdown` has fired: outstanding requests
    /// are dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.inner.refresh_interval.as_secs(),
            method = %self.inner.method,
            "Starting prayer schedule service"
        );

        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            result = self.start() => {
                if let Err(e) = result {
                    warn!(error = %e, "Initial prayer schedule load failed");
                }
            }
        }

        let period = self.inner.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                result = self.tick() => match result {
                    Ok(outcome) => debug!(?outcome, "Periodic refresh finished"),
                    Err(e) => warn!(error = %e, "Periodic refresh failed"),
                }
            }
        }

        debug!("Prayer schedule service stopped");
    }

    /// Spawn [`run`](Self::run) on the tokio runtime.
    #[must_use]
    pub fn spawn(self) -> ScheduleHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.clone().run(shutdown.clone()));
        ScheduleHandle {
            service: self,
            shutdown,
            task: Some(task),
        }
    }

    async fn locate(&self) -> Result<Location> {
        self.publish_state(ScheduleState::AcquiringLocation);

        let position = match tokio::time::timeout(
            self.inner.fetch_timeout,
            self.inner.locator.current_position(),
        )
        .await
        {
            Ok(Ok(coordinates)) => Ok(coordinates),
            Ok(Err(e)) if e.is_location_unavailable() => Err(e),
            Ok(Err(e)) => Err(Error::location_unavailable(e.to_string())),
            Err(_) => Err(Error::location_unavailable("timed out waiting for a position fix")),
        };

        let coordinates = match position {
            Ok(coordinates) => coordinates,
            Err(e) => {
                warn!(error = %e, "Location unavailable");
                let message = e.to_string();
                self.inner.snapshot.send_modify(|snapshot| {
                    snapshot.state = ScheduleState::LocationFailed;
                    snapshot.error = Some(message);
                });
                return Err(e);
            }
        };

        let name = match &self.inner.location_name {
            Some(name) => name.clone(),
            None => self.place_name(coordinates).await,
        };

        let location = Location { coordinates, name };
        info!(location = %location.name, %coordinates, "Location acquired");
        *lock(&self.inner.location) = Some(location.clone());

        let published = location.clone();
        self.inner.snapshot.send_modify(|snapshot| {
            snapshot.location = Some(published);
            snapshot.error = None;
        });
        Ok(location)
    }

    async fn place_name(&self, coordinates: Coordinates) -> String {
        let Some(geocoder) = &self.inner.geocoder else {
            return DEFAULT_LOCATION_NAME.to_string();
        };
        match tokio::time::timeout(self.inner.fetch_timeout, geocoder.reverse(coordinates)).await {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                warn!(error = %e, "Reverse geocoding failed, using generic label");
                DEFAULT_LOCATION_NAME.to_string()
            }
            Err(_) => {
                warn!("Reverse geocoding timed out, using generic label");
                DEFAULT_LOCATION_NAME.to_string()
            }
        }
    }

    async fn load_timetable(&self) -> Result<()> {
        let Some(location) = self.location() else {
            return Err(Error::location_unavailable("no location acquired"));
        };

        let date = self.inner.clock.now().date();
        self.publish_state(ScheduleState::TimetableLoading);
        debug!(%date, provider = self.inner.provider.name(), "Fetching prayer timetable");

        let fetched = match tokio::time::timeout(
            self.inner.fetch_timeout,
            self.inner
                .provider
                .fetch_timetable(location.coordinates, date, self.inner.method),
        )
        .await
        {
            Ok(Ok(table)) => Ok(table),
            Ok(Err(e)) if e.is_timetable_fetch_failed() => Err(e),
            Ok(Err(e)) => Err(Error::timetable_fetch(e.to_string())),
            Err(_) => Err(Error::timetable_fetch(format!(
                "request timed out after {}s",
                self.inner.fetch_timeout.as_secs()
            ))),
        };

        let now = self.inner.clock.now();
        match fetched {
            Ok(table) => {
                let entries = compute_next_prayer(&table, now.time());
                let table_date = table.date();
                *lock(&self.inner.last_table) = Some(table);

                self.inner.snapshot.send_modify(|snapshot| {
                    snapshot.state = ScheduleState::TimetableReady;
                    snapshot.date = Some(table_date);
                    snapshot.entries = entries;
                    snapshot.stale = false;
                    snapshot.error = None;
                    snapshot.updated_at = Some(now);
                    snapshot.generation += 1;
                });
                info!(date = %table_date, "Prayer schedule updated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Prayer timetable fetch failed");
                let last = lock(&self.inner.last_table).clone();
                let message = e.to_string();

                self.inner.snapshot.send_modify(|snapshot| {
                    snapshot.state = ScheduleState::TimetableFailed;
                    snapshot.error = Some(message);
                    snapshot.updated_at = Some(now);
                    snapshot.generation += 1;
                    // Keep the last good timetable but recompute the countdown
                    // so it does not freeze at the last successful fetch
                    match &last {
                        Some(table) => {
                            snapshot.date = Some(table.date());
                            snapshot.entries = compute_next_prayer(table, now.time());
                            snapshot.stale = true;
                        }
                        None => {
                            snapshot.date = None;
                            snapshot.entries = Vec::new();
                            snapshot.stale = false;
                        }
                    }
                });
                Err(e)
            }
        }
    }

    fn publish_state(&self, state: ScheduleState) {
        self.inner
            .snapshot
            .send_modify(|snapshot| snapshot.state = state);
    }
}

/// A running service. Dropping the handle stops the background task.
#[derive(Debug)]
pub struct ScheduleHandle {
    service: PrayerScheduleService,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ScheduleSnapshot {
        self.service.snapshot()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScheduleSnapshot> {
        self.service.subscribe()
    }

    /// Trigger a manual refresh and report its outcome.
    ///
    /// # Errors
    ///
    /// See [`PrayerScheduleService::refresh_now`].
    pub async fn refresh_now(&self) -> Result<()> {
        self.service.refresh_now().await
    }

    /// Whether the background task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the background task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Prayer schedule task ended abnormally");
            }
        }
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::location::Coordinates;
    use crate::logging::init_test_logging;
    use crate::schedule::Prayer;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct FakeLocator {
        coordinates: Mutex<Option<Coordinates>>,
        calls: AtomicUsize,
    }

    impl FakeLocator {
        fn granted() -> Arc<Self> {
            Arc::new(Self {
                coordinates: Mutex::new(Some(Coordinates::new(21.4225, 39.8262).unwrap())),
                calls: AtomicUsize::new(0),
            })
        }

        fn denied() -> Arc<Self> {
            Arc::new(Self {
                coordinates: Mutex::new(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn grant(&self) {
            *self.coordinates.lock().unwrap() = Some(Coordinates::new(21.4225, 39.8262).unwrap());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LocationProvider for FakeLocator {
        async fn current_position(&self) -> Result<Coordinates> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let coordinates = *self.coordinates.lock().unwrap();
            coordinates.ok_or_else(|| Error::location_unavailable("permission denied"))
        }
    }

    struct FakeProvider {
        fail_status: Mutex<Option<u16>>,
        dates: Mutex<Vec<NaiveDate>>,
        gate: Option<Arc<Notify>>,
        entered: Notify,
        delay: Option<Duration>,
    }

    impl FakeProvider {
        fn ok() -> Arc<Self> {
            Arc::new(Self::with(None, None))
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self::with(Some(gate), None))
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self::with(None, Some(delay)))
        }

        fn with(gate: Option<Arc<Notify>>, delay: Option<Duration>) -> Self {
            Self {
                fail_status: Mutex::new(None),
                dates: Mutex::new(Vec::new()),
                gate,
                entered: Notify::new(),
                delay,
            }
        }

        fn fail_with(&self, status: Option<u16>) {
            *self.fail_status.lock().unwrap() = status;
        }

        fn calls(&self) -> usize {
            self.dates.lock().unwrap().len()
        }
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[async_trait]
    impl TimetableProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_timetable(
            &self,
            _coordinates: Coordinates,
            date: NaiveDate,
            method: CalculationMethod,
        ) -> Result<RawTimetable> {
            self.dates.lock().unwrap().push(date);
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let status = *self.fail_status.lock().unwrap();
            if let Some(status) = status {
                return Err(Error::timetable_status(format!("returned {status}"), status));
            }
            Ok(RawTimetable::new(
                date,
                method,
                [hm(5, 12), hm(6, 30), hm(12, 10), hm(15, 30), hm(17, 55), hm(19, 30)],
            ))
        }
    }

    struct FakeGeocoder {
        name: Option<&'static str>,
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn reverse(&self, _coordinates: Coordinates) -> Result<String> {
            self.name
                .map(str::to_string)
                .ok_or_else(|| Error::geocode_failed("service down"))
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 14)
            .unwrap()
            .and_time(hm(h, m))
    }

    fn service(
        locator: Arc<FakeLocator>,
        provider: Arc<FakeProvider>,
        clock: Arc<FixedClock>,
    ) -> PrayerScheduleService {
        init_test_logging();
        PrayerScheduleService::builder(locator, provider)
            .clock(clock)
            .geocoder(Arc::new(FakeGeocoder {
                name: Some("Makkah, Saudi Arabia"),
            }))
            .build()
    }

    #[test]
    fn test_snapshot_flags() {
        let mut snapshot = ScheduleSnapshot::default();
        assert_eq!(snapshot.state, ScheduleState::Uninitialized);
        assert!(!snapshot.is_loading());
        assert!(!snapshot.is_error());

        snapshot.state = ScheduleState::TimetableLoading;
        assert!(snapshot.is_loading());

        snapshot.state = ScheduleState::LocationFailed;
        assert!(snapshot.is_error());
        assert!(snapshot.next_entry().is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ScheduleState::TimetableReady.to_string(), "ready");
        assert_eq!(ScheduleState::LocationFailed.to_string(), "location failed");
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let slot = InFlight::try_acquire(&flag);
        assert!(slot.is_some());
        assert!(InFlight::try_acquire(&flag).is_none());
        drop(slot);
        assert!(InFlight::try_acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_start_publishes_schedule() {
        let locator = FakeLocator::granted();
        let provider = FakeProvider::ok();
        let clock = Arc::new(FixedClock::new(at(4, 0)));
        let svc = service(locator.clone(), provider.clone(), clock);

        svc.start().await.unwrap();
        let snapshot = svc.snapshot();

        assert_eq!(snapshot.state, ScheduleState::TimetableReady);
        assert_eq!(snapshot.generation, 1);
        assert!(!snapshot.stale);
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.entries.len(), 6);
        assert_eq!(snapshot.date, Some(at(4, 0).date()));
        assert_eq!(
            snapshot.location.as_ref().map(|l| l.name.as_str()),
            Some("Makkah, Saudi Arabia")
        );

        let next = snapshot.next_entry().unwrap();
        assert_eq!(next.prayer, Prayer::Fajr);
        assert_eq!(next.time_remaining.as_deref(), Some("1h 12m"));
        assert_eq!(locator.calls(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_geocode_failure_uses_generic_label() {
        let svc = PrayerScheduleService::builder(FakeLocator::granted(), FakeProvider::ok())
            .clock(Arc::new(FixedClock::new(at(9, 0))))
            .geocoder(Arc::new(FakeGeocoder { name: None }))
            .build();

        svc.start().await.unwrap();
        assert_eq!(svc.location().unwrap().name, DEFAULT_LOCATION_NAME);
        assert_eq!(svc.snapshot().state, ScheduleState::TimetableReady);
    }

    #[tokio::test]
    async fn test_configured_name_skips_geocoder() {
        let svc = PrayerScheduleService::builder(FakeLocator::granted(), FakeProvider::ok())
            .clock(Arc::new(FixedClock::new(at(9, 0))))
            .geocoder(Arc::new(FakeGeocoder { name: None }))
            .location_name("Masjid al-Haram")
            .build();

        let location = svc.acquire_location().await.unwrap();
        assert_eq!(location.name, "Masjid al-Haram");
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_last_timetable() {
        let provider = FakeProvider::ok();
        let clock = Arc::new(FixedClock::new(at(4, 0)));
        let svc = service(FakeLocator::granted(), provider.clone(), clock.clone());
        svc.start().await.unwrap();

        provider.fail_with(Some(500));
        clock.advance(chrono::Duration::minutes(10));
        let err = svc.tick().await.unwrap_err();
        assert!(err.is_timetable_fetch_failed());
        assert_eq!(err.http_status(), Some(500));

        let snapshot = svc.snapshot();
        assert_eq!(snapshot.state, ScheduleState::TimetableFailed);
        assert!(snapshot.is_error());
        assert!(snapshot.stale);
        assert!(snapshot.error.as_deref().unwrap().contains("500"));
        assert_eq!(snapshot.entries.len(), 6);
        assert_eq!(snapshot.entries[0].time, hm(5, 12));
        // Countdown follows the clock even though the table is old
        assert_eq!(
            snapshot.next_entry().unwrap().time_remaining.as_deref(),
            Some("1h 2m")
        );
        assert_eq!(snapshot.generation, 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_without_prior_data_is_empty() {
        let provider = FakeProvider::ok();
        provider.fail_with(Some(500));
        let svc = service(
            FakeLocator::granted(),
            provider,
            Arc::new(FixedClock::new(at(4, 0))),
        );

        let err = svc.start().await.unwrap_err();
        assert!(err.is_timetable_fetch_failed());

        let snapshot = svc.snapshot();
        assert_eq!(snapshot.state, ScheduleState::TimetableFailed);
        assert!(snapshot.entries.is_empty());
        assert!(!snapshot.stale);
        assert!(snapshot.is_error());
        assert!(snapshot.next_entry().is_none());
    }

    #[tokio::test]
    async fn test_recovery_after_failure_clears_stale() {
        let provider = FakeProvider::ok();
        let svc = service(
            FakeLocator::granted(),
            provider.clone(),
            Arc::new(FixedClock::new(at(4, 0))),
        );
        svc.start().await.unwrap();

        provider.fail_with(Some(503));
        assert!(svc.tick().await.is_err());
        provider.fail_with(None);
        assert_eq!(svc.tick().await.unwrap(), RefreshOutcome::Published);

        let snapshot = svc.snapshot();
        assert_eq!(snapshot.state, ScheduleState::TimetableReady);
        assert!(!snapshot.stale);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_location_denied_then_manual_retry() {
        let locator = FakeLocator::denied();
        let provider = FakeProvider::ok();
        let svc = service(
            locator.clone(),
            provider.clone(),
            Arc::new(FixedClock::new(at(4, 0))),
        );

        let err = svc.start().await.unwrap_err();
        assert!(err.is_location_unavailable());
        assert_eq!(svc.snapshot().state, ScheduleState::LocationFailed);
        assert_eq!(provider.calls(), 0);

        // Periodic ticks do not re-acquire
        assert_eq!(svc.tick().await.unwrap(), RefreshOutcome::Skipped);
        assert_eq!(locator.calls(), 1);
        assert_eq!(provider.calls(), 0);

        locator.grant();
        svc.refresh_now().await.unwrap();
        assert_eq!(locator.calls(), 2);
        assert_eq!(provider.calls(), 1);
        assert_eq!(svc.snapshot().state, ScheduleState::TimetableReady);
    }

    #[tokio::test]
    async fn test_tick_does_not_reacquire_location() {
        let locator = FakeLocator::granted();
        let provider = FakeProvider::ok();
        let svc = service(
            locator.clone(),
            provider.clone(),
            Arc::new(FixedClock::new(at(4, 0))),
        );
        svc.start().await.unwrap();

        svc.tick().await.unwrap();
        svc.refresh_now().await.unwrap();
        assert_eq!(locator.calls(), 1);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_are_skipped() {
        let gate = Arc::new(Notify::new());
        let provider = FakeProvider::gated(gate.clone());
        let svc = service(
            FakeLocator::granted(),
            provider.clone(),
            Arc::new(FixedClock::new(at(4, 0))),
        );
        svc.acquire_location().await.unwrap();

        let first = tokio::spawn({
            let svc = svc.clone();
            async move { svc.tick().await }
        });
        provider.entered.notified().await;

        assert_eq!(svc.tick().await.unwrap(), RefreshOutcome::Skipped);
        assert!(matches!(
            svc.refresh_now().await,
            Err(Error::RefreshInProgress)
        ));

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), RefreshOutcome::Published);
        assert_eq!(provider.calls(), 1);
        assert_eq!(svc.snapshot().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_a_fetch_failure() {
        let svc = PrayerScheduleService::builder(
            FakeLocator::granted(),
            FakeProvider::slow(Duration::from_secs(30)),
        )
        .clock(Arc::new(FixedClock::new(at(4, 0))))
        .fetch_timeout(Duration::from_secs(10))
        .build();

        let err = svc.start().await.unwrap_err();
        assert!(err.is_timetable_fetch_failed());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(svc.snapshot().state, ScheduleState::TimetableFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_and_date_rollover() {
        let provider = FakeProvider::ok();
        let clock = Arc::new(FixedClock::new(at(23, 59)));
        let svc = PrayerScheduleService::builder(FakeLocator::granted(), provider.clone())
            .clock(clock.clone())
            .refresh_interval(Duration::from_secs(60))
            .build();

        let handle = svc.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.calls(), 1);
        assert!(handle.is_running());

        clock.advance(chrono::Duration::minutes(1));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.calls(), 2);

        let dates = provider.dates.lock().unwrap().clone();
        assert_eq!(dates[0], at(0, 0).date());
        assert_eq!(dates[1], at(0, 0).date().succ_opt().unwrap());
        assert_eq!(handle.snapshot().date, dates[1].into());

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drops_outstanding_fetch() {
        let gate = Arc::new(Notify::new());
        let provider = FakeProvider::gated(gate.clone());
        let svc = service(
            FakeLocator::granted(),
            provider.clone(),
            Arc::new(FixedClock::new(at(4, 0))),
        );

        let handle = svc.clone().spawn();
        provider.entered.notified().await;
        handle.shutdown().await;
        gate.notify_one();
        tokio::task::yield_now().await;

        let snapshot = svc.snapshot();
        assert_eq!(snapshot.state, ScheduleState::TimetableLoading);
        assert_eq!(snapshot.generation, 0);
        // The slot was released when the fetch was dropped
        svc.refresh_now().await.unwrap();
        assert_eq!(svc.snapshot().generation, 1);
    }

    #[tokio::test]
    async fn test_handle_refresh_now_reports_failure() {
        let provider = FakeProvider::ok();
        let svc = service(
            FakeLocator::granted(),
            provider.clone(),
            Arc::new(FixedClock::new(at(4, 0))),
        );
        let handle = svc.spawn();
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.state == ScheduleState::TimetableReady)
            .await
            .unwrap();

        provider.fail_with(Some(502));
        let err = handle.refresh_now().await.unwrap_err();
        assert_eq!(err.http_status(), Some(502));
        assert!(handle.snapshot().stale);
    }
}
