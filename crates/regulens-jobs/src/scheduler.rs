//! Periodic job scheduling.
//!
//! One scheduler instance owns the runners and drives one polling loop per
//! job type. Each loop runs its job immediately on startup, then sleeps its
//! own interval, and exits on the shutdown signal. All state lives on the
//! scheduler; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{error, info};

use regulens_core::{defaults, RunTrigger};

use crate::extraction::ExtractionRunner;
use crate::insights::InsightRunner;
use crate::monitor::RegulationMonitor;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-job-type polling intervals.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub extraction_interval: Duration,
    pub insights_interval: Duration,
    pub monitor_interval: Duration,
    /// Whether the loops run at all.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            extraction_interval: Duration::from_secs(defaults::EXTRACTION_POLL_INTERVAL_SECS),
            insights_interval: Duration::from_secs(defaults::INSIGHTS_POLL_INTERVAL_SECS),
            monitor_interval: Duration::from_secs(defaults::MONITOR_POLL_INTERVAL_SECS),
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SCHEDULER_ENABLED` | `true` | Enable/disable the polling loops |
    /// | `EXTRACTION_POLL_INTERVAL_SECS` | `30` | Extraction loop interval |
    /// | `INSIGHTS_POLL_INTERVAL_SECS` | `60` | Insight loop interval |
    /// | `MONITOR_POLL_INTERVAL_SECS` | `900` | Monitor loop interval |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = |var: &str, fallback: Duration| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            extraction_interval: interval(
                "EXTRACTION_POLL_INTERVAL_SECS",
                defaults.extraction_interval,
            ),
            insights_interval: interval("INSIGHTS_POLL_INTERVAL_SECS", defaults.insights_interval),
            monitor_interval: interval("MONITOR_POLL_INTERVAL_SECS", defaults.monitor_interval),
            enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    pub fn with_extraction_interval(mut self, interval: Duration) -> Self {
        self.extraction_interval = interval;
        self
    }

    pub fn with_insights_interval(mut self, interval: Duration) -> Self {
        self.insights_interval = interval;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// The three periodic job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Extraction,
    Insights,
    Monitor,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Extraction => "extraction",
            JobKind::Insights => "insights",
            JobKind::Monitor => "monitor",
        }
    }
}

/// Event emitted by the scheduler loops.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    CycleCompleted { job: JobKind },
    CycleFailed { job: JobKind, error: String },
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Signal all loops to shut down. Idempotent; loops that already
    /// exited are fine.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }
}

pub struct Scheduler {
    extraction: Arc<ExtractionRunner>,
    insights: Arc<InsightRunner>,
    monitor: Arc<RegulationMonitor>,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(
        extraction: Arc<ExtractionRunner>,
        insights: Arc<InsightRunner>,
        monitor: Arc<RegulationMonitor>,
        config: SchedulerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            extraction,
            insights,
            monitor,
            config,
            event_tx,
        }
    }

    /// Start one loop per job type and return the control handle.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, _) = broadcast::channel(1);
        let event_rx = self.event_tx.subscribe();

        if !self.config.enabled {
            info!(subsystem = "jobs", component = "scheduler", "Scheduler disabled");
            return SchedulerHandle {
                shutdown_tx,
                event_rx,
            };
        }

        info!(
            subsystem = "jobs",
            component = "scheduler",
            extraction_interval_secs = self.config.extraction_interval.as_secs(),
            insights_interval_secs = self.config.insights_interval.as_secs(),
            monitor_interval_secs = self.config.monitor_interval.as_secs(),
            "Scheduler started"
        );

        let extraction = self.extraction.clone();
        let interval = self.config.extraction_interval;
        let events = self.event_tx.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(run_loop(JobKind::Extraction, interval, shutdown, move || {
            let runner = extraction.clone();
            let events = events.clone();
            async move {
                match runner.run_due().await {
                    Ok(_) => {
                        let _ = events.send(SchedulerEvent::CycleCompleted {
                            job: JobKind::Extraction,
                        });
                    }
                    Err(e) => {
                        error!(
                            subsystem = "jobs",
                            component = "scheduler",
                            job = JobKind::Extraction.as_str(),
                            "Cycle failed: {e}"
                        );
                        let _ = events.send(SchedulerEvent::CycleFailed {
                            job: JobKind::Extraction,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }));

        let insights = self.insights.clone();
        let interval = self.config.insights_interval;
        let events = self.event_tx.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(run_loop(JobKind::Insights, interval, shutdown, move || {
            let runner = insights.clone();
            let events = events.clone();
            async move {
                match runner.run_due().await {
                    Ok(_) => {
                        let _ = events.send(SchedulerEvent::CycleCompleted {
                            job: JobKind::Insights,
                        });
                    }
                    Err(e) => {
                        error!(
                            subsystem = "jobs",
                            component = "scheduler",
                            job = JobKind::Insights.as_str(),
                            "Cycle failed: {e}"
                        );
                        let _ = events.send(SchedulerEvent::CycleFailed {
                            job: JobKind::Insights,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }));

        let monitor = self.monitor.clone();
        let interval = self.config.monitor_interval;
        let events = self.event_tx.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(run_loop(JobKind::Monitor, interval, shutdown, move || {
            let monitor = monitor.clone();
            let events = events.clone();
            async move {
                match monitor.run(RunTrigger::Schedule, false, None).await {
                    Ok(_) => {
                        let _ = events.send(SchedulerEvent::CycleCompleted {
                            job: JobKind::Monitor,
                        });
                    }
                    Err(e) => {
                        error!(
                            subsystem = "jobs",
                            component = "scheduler",
                            job = JobKind::Monitor.as_str(),
                            "Cycle failed: {e}"
                        );
                        let _ = events.send(SchedulerEvent::CycleFailed {
                            job: JobKind::Monitor,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }));

        SchedulerHandle {
            shutdown_tx,
            event_rx,
        }
    }
}

/// One polling loop: run the cycle, then sleep the interval or exit on
/// shutdown. The first cycle runs immediately.
async fn run_loop<F, Fut>(
    job: JobKind,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
    cycle: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    loop {
        cycle().await;
        tokio::select! {
            _ = shutdown.recv() => {
                info!(
                    subsystem = "jobs",
                    component = "scheduler",
                    job = job.as_str(),
                    "Loop received shutdown signal"
                );
                break;
            }
            _ = sleep(interval) => {}
        }
    }
}
