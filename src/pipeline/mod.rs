//! The sustained-throughput pipeline: bounded queues, the transaction
//! worker pool, and the rate-controlled scheduler.

pub mod queue;
pub mod scheduler;
pub mod worker;

pub use queue::{PushError, TaskQueue};
pub use scheduler::{
    burst_cap, workers_needed, Scheduler, SchedulerState, SchedulerStatus,
    SCHEDULER_TPS_CAPACITY,
};
pub use worker::{CreatedTransaction, PoolStatus, TxnError, TxnPipeline, TxnTask, WorkerPool};
