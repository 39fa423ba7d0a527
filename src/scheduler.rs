//! Continuous feed polling.
//!
//! [`PollScheduler`] owns one [`PollTask`] per started source. Each task
//! runs an interval timer; on every tick it runs a fetch → decode →
//! validate → store cycle, guarded by a per-source running flag so that at
//! most one cycle per source is ever in flight — a tick that fires while
//! the previous cycle is still running is skipped and logged. Cycle
//! failures (fetch, decode, store) are logged and swallowed; the flag is
//! released by a drop guard, so even a cycle that panics never wedges its
//! source. Distinct sources are fully independent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::feed::FeedMessage;
use crate::fetch::FeedFetcher;
use crate::output::{ReportSink, ValidationReport};
use crate::parser::parse_feed;
use crate::rules::RuleRegistry;
use crate::schedule::ScheduleHandle;

/// One feed source to poll.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub id: String,
    pub url: String,
    pub interval: Duration,
}

struct PollTask {
    shutdown: watch::Sender<bool>,
    timer: JoinHandle<()>,
    state: Arc<SourceState>,
}

/// Per-source state shared between the timer loop and spawned cycles.
struct SourceState {
    source: FeedSource,
    fetcher: Arc<dyn FeedFetcher>,
    /// Set while a cycle is in flight; released by [`CycleGuard`].
    running: AtomicBool,
    /// Handle of the most recently spawned cycle, awaited at shutdown.
    cycle: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Snapshot from the previous successful decode, for rules that compare
    /// successive polls. The first poll has no predecessor.
    previous: std::sync::Mutex<Option<Arc<FeedMessage>>>,
    last_run: std::sync::Mutex<Option<DateTime<Utc>>>,
}

/// Owns the poll tasks; constructed once at process start and passed by
/// handle to anything that needs to start or stop sources.
pub struct PollScheduler {
    registry: Arc<RuleRegistry>,
    schedule: ScheduleHandle,
    sink: Arc<dyn ReportSink>,
    tasks: tokio::sync::Mutex<HashMap<String, PollTask>>,
}

impl PollScheduler {
    pub fn new(registry: RuleRegistry, schedule: ScheduleHandle, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            registry: Arc::new(registry),
            schedule,
            sink,
            tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The shared schedule dataset; replacing it through this handle takes
    /// effect for cycles that start after the replacement.
    pub fn schedule(&self) -> &ScheduleHandle {
        &self.schedule
    }

    /// Starts polling `source` with `fetcher`. Idempotent: starting an
    /// already-running source is a no-op returning `false`.
    pub async fn start(&self, source: FeedSource, fetcher: Arc<dyn FeedFetcher>) -> bool {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&source.id) {
            warn!(source_id = %source.id, "Source already polling, start ignored");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(SourceState {
            source: source.clone(),
            fetcher,
            running: AtomicBool::new(false),
            cycle: std::sync::Mutex::new(None),
            previous: std::sync::Mutex::new(None),
            last_run: std::sync::Mutex::new(None),
        });

        let span = tracing::info_span!("poll_source", source_id = %source.id);
        let timer = tokio::spawn(
            timer_loop(
                state.clone(),
                self.registry.clone(),
                self.schedule.clone(),
                self.sink.clone(),
                shutdown_rx,
            )
            .instrument(span),
        );

        info!(source_id = %source.id, interval_secs = source.interval.as_secs(), "Source polling started");
        tasks.insert(
            source.id,
            PollTask {
                shutdown: shutdown_tx,
                timer,
                state,
            },
        );
        true
    }

    /// Stops polling `source_id`. Waits for an in-flight cycle to finish
    /// (the fetch timeout bounds the wait), and no new cycle starts after
    /// this returns. Returns `false` if the source was not running.
    pub async fn stop(&self, source_id: &str) -> bool {
        let task = self.tasks.lock().await.remove(source_id);
        match task {
            Some(task) => {
                shut_down(source_id, task).await;
                true
            }
            None => {
                warn!(source_id, "Stop requested for unknown source");
                false
            }
        }
    }

    /// Stops every source.
    pub async fn stop_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (source_id, task) in tasks {
            shut_down(&source_id, task).await;
        }
    }

    /// When the source last completed a cycle, if it has.
    pub async fn last_run(&self, source_id: &str) -> Option<DateTime<Utc>> {
        let tasks = self.tasks.lock().await;
        let task = tasks.get(source_id)?;
        *task.state.last_run.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn shut_down(source_id: &str, task: PollTask) {
    // Suppress further timer firings; the watch receiver ends the loop.
    let _ = task.shutdown.send(true);
    if task.timer.await.is_err() {
        error!(source_id, "Poll timer task panicked");
    }
    // The timer is gone, so no new cycle can start; wait out the cycle
    // that may still be in flight before reporting the source stopped.
    let cycle = task
        .state
        .cycle
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .take();
    if let Some(cycle) = cycle {
        if cycle.await.is_err() {
            error!(source_id, "Poll cycle task panicked");
        }
    }
    info!(source_id, "Source polling stopped");
}

/// Releases the source's running flag when dropped, so a cycle that
/// panics mid-flight still frees its source for the next tick.
struct CycleGuard(Arc<SourceState>);

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

async fn timer_loop(
    state: Arc<SourceState>,
    registry: Arc<RuleRegistry>,
    schedule: ScheduleHandle,
    sink: Arc<dyn ReportSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(state.source.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if state.running.swap(true, Ordering::AcqRel) {
                    warn!("Previous poll cycle still in flight, skipping tick");
                    continue;
                }
                let guard = CycleGuard(state.clone());
                let registry = registry.clone();
                let schedule = schedule.clone();
                let sink = sink.clone();
                let span = tracing::info_span!("poll_cycle", source_id = %state.source.id);
                let handle = tokio::spawn(
                    async move {
                        run_cycle(&guard.0, &registry, &schedule, sink.as_ref()).await;
                    }
                    .instrument(span),
                );
                *state.cycle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
            }
        }
    }
}

/// One fetch → decode → validate → store cycle. Every failure is logged
/// and swallowed here; the next interval retries.
async fn run_cycle(
    state: &SourceState,
    registry: &RuleRegistry,
    schedule: &ScheduleHandle,
    sink: &dyn ReportSink,
) {
    let fetch_start = std::time::Instant::now();
    let bytes = match state.fetcher.fetch(&state.source.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Feed fetch failed");
            return;
        }
    };
    let elapsed = fetch_start.elapsed();
    if elapsed.as_secs() > 15 {
        warn!(elapsed_secs = elapsed.as_secs(), "Feed fetch was slow");
    }

    debug!(bytes = bytes.len(), "Feed bytes received, decoding");
    let feed = match parse_feed(&bytes) {
        Ok(feed) => feed,
        Err(e) => {
            error!(error = %e, "Feed decode failed");
            return;
        }
    };

    // Grab the schedule once; a dataset swap mid-cycle is not observed.
    let dataset = schedule.current();
    let now = Utc::now();
    let previous = state
        .previous
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();

    let violations = registry.evaluate(
        now.timestamp() as u64,
        &dataset.patterns,
        &dataset.metadata,
        &feed,
        previous.as_deref(),
    );

    info!(
        entities = feed.entity.len(),
        violations = violations.len(),
        "Poll cycle validated"
    );

    *state.previous.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(feed));

    let report = ValidationReport {
        source_id: state.source.id.clone(),
        timestamp: now,
        violations,
    };
    if let Err(e) = sink.publish(&report).await {
        error!(error = %e, "Failed to store validation report");
        return;
    }

    *state.last_run.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
}
