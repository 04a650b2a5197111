//! PostgreSQL persistence for the regulens pipeline.
//!
//! Implements the repository traits from `regulens-core` over sqlx, plus
//! the pgvector chunk store, filesystem blob access, and the advisory-lock
//! single-flight primitive. Schema lives in `migrations/`.

pub mod advisory_lock;
pub mod cases;
pub mod chunks;
pub mod extractions;
pub mod file_storage;
pub mod monitor_runs;
pub mod notifications;
pub mod pool;
pub mod regulations;
pub mod subscriptions;

pub use advisory_lock::PgSingleFlight;
pub use cases::PgCaseRepository;
pub use chunks::PgChunkRepository;
pub use extractions::PgExtractionRepository;
pub use file_storage::FilesystemBlobStorage;
pub use monitor_runs::PgMonitorRunRepository;
pub use notifications::{BroadcastEvent, PgNotifier};
pub use pool::{create_pool, create_pool_with_config, run_migrations, PoolConfig};
pub use regulations::PgRegulationRepository;
pub use subscriptions::PgSubscriptionRepository;
