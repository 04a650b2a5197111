//! # regulens-jobs
//!
//! Background pipeline runners for regulens.
//!
//! This crate provides:
//! - Conditional-fetch change detection for monitored regulation sources
//! - The regulation monitor cycle with advisory-lock single-flight
//! - Document text extraction with chunk indexing
//! - Case insight generation over retrieved chunk context
//! - A scheduler driving one polling loop per job type
//!
//! Runners depend only on the repository traits in `regulens-core` and the
//! AI client trait in `regulens-ai`, so every path is testable against
//! in-memory doubles.
//!
//! ## Example
//!
//! ```ignore
//! use regulens_jobs::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(extraction, insights, monitor, SchedulerConfig::from_env());
//! let handle = scheduler.start();
//!
//! // Listen for cycle events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown();
//! ```

pub mod change_detect;
pub mod extraction;
pub mod insights;
pub mod monitor;
pub mod retrieval;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use change_detect::{ChangeDetector, ChangeOutcome};
pub use extraction::{ExtractionConfig, ExtractionRunner};
pub use insights::{InsightConfig, InsightRunner};
pub use monitor::{MonitorConfig, MonitorReport, RegulationMonitor};
pub use retrieval::{ChunkIndexer, IndexReport, RetrievedContext};
pub use scheduler::{JobKind, Scheduler, SchedulerConfig, SchedulerEvent, SchedulerHandle};
