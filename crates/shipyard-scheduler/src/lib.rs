//! Build scheduling for Shipyard.
//!
//! Polls queue sources, gates dispatch on builder pool capacity and
//! acknowledges messages only once their build has started. Finished builds
//! release their slot through the completion server.

pub mod completion;
pub mod pg_queue;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod timeout;

pub use pg_queue::PgJobQueue;
pub use pool::ContainerBuilderPool;
pub use queue::{JobBackend, JobQueueSource, MessageBackend, MessageQueueSource, QueuedJob, RawMessage};
pub use scheduler::{BuildScheduler, CycleOutcome, SchedulerState};
pub use timeout::{TimeoutReporter, TimeoutWatcher};
