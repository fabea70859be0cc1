//! SurgePool Scheduler
//!
//! This crate provides the adaptive worker-pool core with:
//! - WorkerPool: per-task-type pools with demand-driven thread growth
//! - BoosterPool: a shared elastic reserve that steals backlogged work and
//!   retunes its size from a measured concurrency signal
//! - SchedulerContext: explicit registry with lazy pool creation and a
//!   clean init/teardown lifecycle
//! - TaskExecutor: scoped submit-and-wait fan-out for batch callers
//! - Task combination: merging compatible queued tasks before execution

pub mod booster;
pub mod context;
pub mod error;
pub mod executor;
pub mod meter;
pub mod pool;
mod queue;
pub mod task;

pub use booster::BoosterPool;
pub use context::{SchedulerContext, Submission};
pub use error::SchedulerError;
pub use executor::TaskExecutor;
pub use meter::{ActiveThreadMeter, ConcurrencySource};
pub use pool::WorkerPool;
pub use task::{CombineOutcome, Task};

// Re-export the shared configuration and stats surface for embedders
pub use sp_common::{
    BoosterSettings, BoosterStats, CurvePoint, PoolSizePolicy, PoolStats, SchedulerSettings,
    SchedulerStats, TaskPolicy, TaskSettings, TaskTypeId,
};

pub type Result<T> = std::result::Result<T, SchedulerError>;
