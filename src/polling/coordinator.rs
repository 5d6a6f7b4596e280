//! One shared listing poll fanned out to every registered device.
//!
//! Devices register with a correlation key. A single interval fetches the
//! listing and each item is delivered to the entries whose key matches the
//! item's correlation field. Registration bursts are collapsed by debounce
//! timers, and a poll that is already running makes any new poll a no-op.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::debouncer::Debouncer;
use super::fetcher::ListingFetcher;
use crate::config::PollingConfig;
use crate::error::HubError;
use crate::models::{DataUpdate, UpdateCallback, UpdateSource};
use crate::util::lock;

/// Receives the fetched listing of an externally triggered poll.
pub type PollCompletion = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Called when the last registered device unregisters.
pub type EmptyHook = Arc<dyn Fn() + Send + Sync>;

/// One device taking part in the shared poll.
#[derive(Clone)]
pub struct PollerEntry {
    pub device_id: String,
    pub correlation_key: String,
    callback: UpdateCallback,
}

impl std::fmt::Debug for PollerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerEntry")
            .field("device_id", &self.device_id)
            .field("correlation_key", &self.correlation_key)
            .finish()
    }
}

/// Result of [`PollingCoordinator::execute_poll`].
#[derive(Debug)]
pub enum PollOutcome {
    /// Another poll was in flight.
    Skipped,
    Completed {
        items: Vec<Value>,
        /// Number of updates handed to registered devices.
        delivered: usize,
    },
    Failed(HubError),
}

impl PollOutcome {
    /// The fetched listing, or an empty list when nothing was fetched.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            PollOutcome::Completed { items, .. } => items,
            PollOutcome::Skipped | PollOutcome::Failed(_) => Vec::new(),
        }
    }
}

/// Counters of a coordinator since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollingStats {
    pub registered: usize,
    pub active: bool,
    pub interval_starts: u64,
    pub polls_executed: u64,
    pub polls_skipped: u64,
    pub polls_failed: u64,
}

#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    fetcher: Arc<dyn ListingFetcher>,
    config: PollingConfig,
    state: Mutex<CoordinatorState>,
    in_flight: AtomicBool,
    /// Woken whenever a poll releases the in-flight guard.
    poll_done: Notify,
    /// Listing of the last poll to finish; `None` if it failed or was cancelled.
    last_listing: Mutex<Option<Vec<Value>>>,
    destroyed: AtomicBool,
    on_empty: Mutex<Option<EmptyHook>>,
    interval_starts: AtomicU64,
    polls_executed: AtomicU64,
    polls_skipped: AtomicU64,
    polls_failed: AtomicU64,
}

struct CoordinatorState {
    entries: HashMap<String, PollerEntry>,
    interval_task: Option<JoinHandle<()>>,
    start_debounce: Debouncer,
    catch_up_debounce: Debouncer,
    external_debounce: Debouncer,
    last_external: HashMap<String, Value>,
    pending_completions: Vec<PollCompletion>,
    /// Set by `pause`; registrations are kept but nothing is scheduled.
    paused: bool,
}

impl CoordinatorState {
    /// Stop the interval and every debounce timer; returns the completions
    /// that will no longer run.
    fn stop(&mut self) -> Vec<PollCompletion> {
        if let Some(task) = self.interval_task.take() {
            task.abort();
        }
        self.start_debounce.cancel();
        self.catch_up_debounce.cancel();
        self.external_debounce.cancel();
        std::mem::take(&mut self.pending_completions)
    }
}

/// Clears the in-flight flag when the poll ends, including on cancellation,
/// and wakes everyone waiting for that poll.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    done: &'a Notify,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool, done: &'a Notify) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard { flag, done })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}

impl PollingCoordinator {
    pub fn new(fetcher: Arc<dyn ListingFetcher>, config: PollingConfig) -> Self {
        let state = CoordinatorState {
            entries: HashMap::new(),
            interval_task: None,
            start_debounce: Debouncer::new(config.start_debounce),
            catch_up_debounce: Debouncer::new(config.catch_up_debounce),
            external_debounce: Debouncer::new(config.external_debounce),
            last_external: HashMap::new(),
            pending_completions: Vec::new(),
            paused: false,
        };
        Self {
            inner: Arc::new(CoordinatorInner {
                fetcher,
                config,
                state: Mutex::new(state),
                in_flight: AtomicBool::new(false),
                poll_done: Notify::new(),
                last_listing: Mutex::new(None),
                destroyed: AtomicBool::new(false),
                on_empty: Mutex::new(None),
                interval_starts: AtomicU64::new(0),
                polls_executed: AtomicU64::new(0),
                polls_skipped: AtomicU64::new(0),
                polls_failed: AtomicU64::new(0),
            }),
        }
    }

    /// Hook run after the last device unregisters.
    pub fn set_on_empty(&self, hook: EmptyHook) {
        *lock(&self.inner.on_empty) = Some(hook);
    }

    /// Add a device to the shared poll. Returns `false` if it was already
    /// registered or the coordinator was destroyed. While paused the entry is
    /// stored and only polled after [`resume`](Self::resume).
    pub fn register(
        &self,
        device_id: impl Into<String>,
        correlation_key: impl Into<String>,
        callback: UpdateCallback,
    ) -> bool {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            warn!("Register on a destroyed polling coordinator ignored");
            return false;
        }

        let device_id = device_id.into();
        let mut state = lock(&self.inner.state);
        if state.entries.contains_key(&device_id) {
            debug!(device_id = %device_id, "Device already registered for polling");
            return false;
        }

        let entry = PollerEntry {
            device_id: device_id.clone(),
            correlation_key: correlation_key.into(),
            callback,
        };
        state.entries.insert(device_id.clone(), entry);
        debug!(device_id = %device_id, registered = state.entries.len(), "Registered for polling");

        if state.paused {
            debug!(device_id = %device_id, "Polling paused, start deferred until resume");
            return true;
        }
        let weak = Arc::downgrade(&self.inner);
        if state.interval_task.is_some() {
            state.catch_up_debounce.trigger(move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        debug!("Running catch-up poll");
                        inner.execute_poll(UpdateSource::Polled).await;
                    });
                }
            });
        } else {
            CoordinatorInner::schedule_start(weak, &mut state);
        }
        true
    }

    /// Remove a device. Stops all polling when it was the last one.
    pub fn unregister(&self, device_id: &str) -> bool {
        let (now_empty, abandoned) = {
            let mut state = lock(&self.inner.state);
            if state.entries.remove(device_id).is_none() {
                return false;
            }
            debug!(device_id, remaining = state.entries.len(), "Unregistered from polling");
            if state.entries.is_empty() {
                info!("Last device unregistered, stopping polling");
                (true, state.stop())
            } else {
                (false, Vec::new())
            }
        };

        for completion in abandoned {
            completion(Vec::new());
        }
        if now_empty {
            let hook = lock(&self.inner.on_empty).clone();
            if let Some(hook) = hook {
                hook();
            }
        }
        true
    }

    /// Fetch the listing once and deliver it to every registered device.
    pub async fn execute_poll(&self) -> PollOutcome {
        self.inner.execute_poll(UpdateSource::Polled).await
    }

    /// Request a poll because of an event outside the polled devices.
    ///
    /// Ignored (returns `false`) when `value` equals the last value seen for
    /// `source_id`. Otherwise one poll runs after the external debounce
    /// window, shared by every trigger in that window. If a regular poll is
    /// in flight at that point its listing is reused. `on_complete` gets the
    /// fetched list, or an empty list when the poll failed or was cancelled.
    /// Events are rejected while paused.
    pub fn notify_external_event(
        &self,
        source_id: &str,
        value: Value,
        on_complete: Option<PollCompletion>,
    ) -> bool {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            if let Some(on_complete) = on_complete {
                on_complete(Vec::new());
            }
            return false;
        }

        let mut state = lock(&self.inner.state);
        if state.paused {
            debug!(source_id, "Polling paused, external event dropped");
            drop(state);
            if let Some(on_complete) = on_complete {
                on_complete(Vec::new());
            }
            return false;
        }
        if state.last_external.get(source_id) == Some(&value) {
            debug!(source_id, "External event unchanged, ignoring");
            return false;
        }
        state.last_external.insert(source_id.to_string(), value);
        if let Some(on_complete) = on_complete {
            state.pending_completions.push(on_complete);
        }

        debug!(source_id, "External event, scheduling poll");
        let weak = Arc::downgrade(&self.inner);
        state.external_debounce.trigger(move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move { inner.run_external_poll().await });
            }
        });
        true
    }

    pub fn is_registered(&self, device_id: &str) -> bool {
        lock(&self.inner.state).entries.contains_key(device_id)
    }

    pub fn registered_count(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    /// Whether the shared interval is running.
    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).interval_task.is_some()
    }

    pub fn stats(&self) -> PollingStats {
        let (registered, active) = {
            let state = lock(&self.inner.state);
            (state.entries.len(), state.interval_task.is_some())
        };
        PollingStats {
            registered,
            active,
            interval_starts: self.inner.interval_starts.load(Ordering::SeqCst),
            polls_executed: self.inner.polls_executed.load(Ordering::SeqCst),
            polls_skipped: self.inner.polls_skipped.load(Ordering::SeqCst),
            polls_failed: self.inner.polls_failed.load(Ordering::SeqCst),
        }
    }

    /// Stop the interval and pending timers but keep registrations.
    pub fn pause(&self) {
        let abandoned = {
            let mut state = lock(&self.inner.state);
            if state.interval_task.is_some() {
                info!("Pausing shared poll");
            }
            state.paused = true;
            state.stop()
        };
        for completion in abandoned {
            completion(Vec::new());
        }
    }

    /// Restart the interval after [`pause`](Self::pause) if any device is
    /// registered.
    pub fn resume(&self) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let mut state = lock(&self.inner.state);
        state.paused = false;
        if state.interval_task.is_none() && !state.entries.is_empty() {
            debug!(registered = state.entries.len(), "Resuming shared poll");
            CoordinatorInner::schedule_start(Arc::downgrade(&self.inner), &mut state);
        }
    }

    /// Stop polling and drop every registration without running the empty
    /// hook. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let abandoned = {
            let mut state = lock(&self.inner.state);
            state.entries.clear();
            state.last_external.clear();
            state.stop()
        };
        for completion in abandoned {
            completion(Vec::new());
        }
        *lock(&self.inner.on_empty) = None;
        info!("Polling coordinator destroyed");
    }
}

impl CoordinatorInner {
    fn schedule_start(weak: Weak<Self>, state: &mut CoordinatorState) {
        state.start_debounce.trigger(move || {
            if let Some(inner) = weak.upgrade() {
                inner.start_interval();
            }
        });
    }

    fn start_interval(self: &Arc<Self>) {
        let mut state = lock(&self.state);
        if state.paused || state.interval_task.is_some() || state.entries.is_empty() {
            return;
        }

        let starts = self.interval_starts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            devices = state.entries.len(),
            interval_secs = self.config.interval.as_secs(),
            starts,
            "Starting shared poll"
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.interval;
        state.interval_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.execute_poll(UpdateSource::Polled).await;
            }
        }));
    }

    async fn execute_poll(&self, source: UpdateSource) -> PollOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &self.poll_done) else {
            self.polls_skipped.fetch_add(1, Ordering::SeqCst);
            debug!("Poll already in flight, skipping");
            return PollOutcome::Skipped;
        };
        self.polls_executed.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_listing) = None;

        match self.fetcher.fetch_listing().await {
            Ok(items) => {
                let delivered = self.demultiplex(&items, source);
                debug!(items = items.len(), delivered, %source, "Poll completed");
                *lock(&self.last_listing) = Some(items.clone());
                PollOutcome::Completed { items, delivered }
            }
            Err(error) => {
                self.polls_failed.fetch_add(1, Ordering::SeqCst);
                warn!(error = %error, "Poll failed");
                PollOutcome::Failed(error)
            }
        }
    }

    async fn run_external_poll(&self) {
        let completions = std::mem::take(&mut lock(&self.state).pending_completions);

        // Registered before trying so the release of a running poll is not missed.
        let done = self.poll_done.notified();
        tokio::pin!(done);
        done.as_mut().enable();

        let items = match self.execute_poll(UpdateSource::External).await {
            PollOutcome::Skipped => {
                debug!("External poll joins the poll in flight");
                done.await;
                let listing = lock(&self.last_listing).clone();
                listing.unwrap_or_default()
            }
            outcome => outcome.into_items(),
        };
        for completion in completions {
            completion(items.clone());
        }
    }

    /// Hand each registered entry the item carrying its correlation key.
    fn demultiplex(&self, items: &[Value], source: UpdateSource) -> usize {
        let entries: Vec<PollerEntry> = lock(&self.state).entries.values().cloned().collect();
        if entries.is_empty() {
            return 0;
        }

        let field = self.config.correlation_field.as_str();
        let by_key: HashMap<String, &Value> = items
            .iter()
            .filter_map(|item| correlation_value(item, field).map(|key| (key, item)))
            .collect();

        let mut delivered = 0;
        for entry in entries {
            match by_key.get(&entry.correlation_key) {
                Some(item) => {
                    (entry.callback)(DataUpdate::new(
                        entry.device_id.clone(),
                        (*item).clone(),
                        source,
                    ));
                    delivered += 1;
                }
                None => debug!(
                    device_id = %entry.device_id,
                    key = %entry.correlation_key,
                    "No listing item for device"
                ),
            }
        }
        delivered
    }
}

/// String form of `item[field]`; numbers are matched by their decimal form.
fn correlation_value(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
