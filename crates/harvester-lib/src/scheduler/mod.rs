//! Daily refresh scheduling
//!
//! `RefreshScheduler` owns the single entry point for refresh cycles.
//! The recurring timer, the lazy refresh on a cache miss and the manual
//! refresh endpoint all go through `perform_refresh`, which runs at most one
//! cycle at a time. A trigger arriving while a cycle is running is dropped,
//! not queued.

use crate::cache::TtlCache;
use crate::health::{components, HealthRegistry};
use crate::models::MetricsRecord;
use crate::observability::{HarvesterMetrics, StructuredLogger};
use crate::pipeline::RefreshPipeline;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};


/// Configuration for the refresh scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time of day (UTC) at which the daily cycle fires
    pub refresh_at: NaiveTime,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_at: NaiveTime::MIN,
        }
    }
}

/// What asked for a refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Scheduled,
    Bootstrap,
    CacheMiss,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Scheduled => "scheduled",
            RefreshTrigger::Bootstrap => "bootstrap",
            RefreshTrigger::CacheMiss => "cache_miss",
            RefreshTrigger::Manual => "manual",
        }
    }
}

/// Result of a `perform_refresh` call
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new record was stored
    Updated(MetricsRecord),
    /// The cycle ran but no source produced a cacheable record
    NoUpdate,
    /// Another cycle was already running
    Skipped,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Updated(_) => "updated",
            RefreshOutcome::NoUpdate => "no_update",
            RefreshOutcome::Skipped => "skipped",
        }
    }
}

/// Whether the tracked key currently holds a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Active,
    Empty,
}

/// Scheduler status surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub job_active: bool,
    pub cache_status: CacheState,
    pub cache_inserted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Timing {
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: DateTime<Utc>,
}

/// Single-flight daily refresh scheduler
pub struct RefreshScheduler {
    pipeline: Arc<RefreshPipeline>,
    cache: Arc<TtlCache<MetricsRecord>>,
    config: SchedulerConfig,
    is_running: AtomicBool,
    timing: RwLock<Timing>,
    job: Mutex<Option<JoinHandle<()>>>,
    health: HealthRegistry,
    metrics: HarvesterMetrics,
    logger: StructuredLogger,
}

/// Clears the running flag and re-arms `next_run_at` when a cycle ends,
/// including when the cycle panics.
struct CycleGuard {
    scheduler: Arc<RefreshScheduler>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let next = next_daily_run(Utc::now(), self.scheduler.config.refresh_at);
        self.scheduler.write_timing(|timing| timing.next_run_at = next);
        self.scheduler.is_running.store(false, Ordering::Release);
    }
}

impl RefreshScheduler {
    pub fn new(
        pipeline: Arc<RefreshPipeline>,
        cache: Arc<TtlCache<MetricsRecord>>,
        config: SchedulerConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        let next_run_at = next_daily_run(Utc::now(), config.refresh_at);
        Self {
            pipeline,
            cache,
            config,
            is_running: AtomicBool::new(false),
            timing: RwLock::new(Timing {
                last_run_at: None,
                next_run_at,
            }),
            job: Mutex::new(None),
            health,
            metrics: HarvesterMetrics::new(),
            logger,
        }
    }

    /// Key of the record this scheduler keeps fresh
    pub fn cache_key(&self) -> &str {
        self.pipeline.cache_key()
    }

    /// Run one refresh cycle unless one is already running.
    ///
    /// The cycle runs in its own task: dropping the returned future stops
    /// waiting for the outcome but never cancels the cycle.
    pub async fn perform_refresh(self: &Arc<Self>, trigger: RefreshTrigger) -> RefreshOutcome {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.inc_refresh_cycle(RefreshOutcome::Skipped.as_str());
            self.logger.log_refresh_skipped(trigger.as_str());
            return RefreshOutcome::Skipped;
        }

        let guard = CycleGuard {
            scheduler: Arc::clone(self),
        };
        let cycle = tokio::spawn(async move {
            let outcome = guard.scheduler.run_cycle(trigger).await;
            drop(guard);
            outcome
        });

        match cycle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(trigger = trigger.as_str(), error = %e, "Refresh cycle aborted");
                self.metrics.inc_refresh_cycle(RefreshOutcome::NoUpdate.as_str());
                RefreshOutcome::NoUpdate
            }
        }
    }

    async fn run_cycle(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let started_at = Utc::now();
        self.write_timing(|timing| timing.last_run_at = Some(started_at));
        info!(trigger = trigger.as_str(), "Starting refresh cycle");

        self.cache.delete(self.cache_key());

        let outcome = match self.pipeline.run().await {
            Some(record) => RefreshOutcome::Updated(record),
            None => RefreshOutcome::NoUpdate,
        };

        self.metrics.inc_refresh_cycle(outcome.as_str());
        info!(
            trigger = trigger.as_str(),
            outcome = outcome.as_str(),
            "Refresh cycle finished"
        );
        outcome
    }

    /// Arm the daily timer, then run a bootstrap cycle if nothing is cached.
    ///
    /// Returns the bootstrap outcome when one ran.
    pub async fn start(self: &Arc<Self>) -> Option<RefreshOutcome> {
        let next = next_daily_run(Utc::now(), self.config.refresh_at);
        self.write_timing(|timing| timing.next_run_at = next);

        {
            let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());
            if job.as_ref().is_some_and(|handle| !handle.is_finished()) {
                warn!("Refresh timer already running");
            } else {
                *job = Some(self.spawn_timer());
            }
        }

        self.health.set_healthy(components::SCHEDULER).await;
        info!(
            next_run_at = %next,
            refresh_at = %self.config.refresh_at,
            "Refresh scheduler started"
        );

        if self.cache.has(self.cache_key()) {
            debug!("Cache already populated, skipping bootstrap refresh");
            return None;
        }
        Some(self.perform_refresh(RefreshTrigger::Bootstrap).await)
    }

    /// Cancel the recurring timer. A cycle already in flight runs in its own
    /// task and is left to finish.
    pub async fn stop(&self) -> bool {
        let handle = self.job.lock().unwrap_or_else(|e| e.into_inner()).take();

        match handle {
            Some(handle) => {
                handle.abort();
                self.health
                    .set_degraded(components::SCHEDULER, "Refresh timer stopped")
                    .await;
                info!("Refresh scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let (last_run_at, next_run_at) = {
            let timing = self.timing.read().unwrap_or_else(|e| e.into_inner());
            (timing.last_run_at, timing.next_run_at)
        };
        let job_active = self
            .job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        let cache_inserted_at = self.cache.inserted_at(self.cache_key());

        SchedulerStatus {
            is_running: self.is_running.load(Ordering::Acquire),
            last_run_at,
            next_run_at,
            job_active,
            cache_status: if cache_inserted_at.is_some() {
                CacheState::Active
            } else {
                CacheState::Empty
            },
            cache_inserted_at,
        }
    }

    fn next_run_at(&self) -> DateTime<Utc> {
        self.timing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .next_run_at
    }

    fn write_timing(&self, update: impl FnOnce(&mut Timing)) {
        update(&mut self.timing.write().unwrap_or_else(|e| e.into_inner()));
    }

    /// Sleep until each boundary, fire a cycle in its own task, re-arm
    fn spawn_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let next = scheduler.next_run_at();
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                debug!(next_run_at = %next, wait_secs = wait.as_secs(), "Waiting for next refresh");
                tokio::time::sleep(wait).await;

                let cycle = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    cycle.perform_refresh(RefreshTrigger::Scheduled).await;
                });

                let rearmed = next_daily_run(Utc::now().max(next), scheduler.config.refresh_at);
                scheduler.write_timing(|timing| timing.next_run_at = rearmed);
            }
        })
    }
}

/// The first occurrence of `at` (UTC) strictly after `now`
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}
