use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub mod logging;
pub mod settings;

pub use settings::{
    BoosterSettings, CurvePoint, SchedulerSettings, SettingsError, TaskSettings,
};

// ============================================================================
// Core Identifiers
// ============================================================================

/// Identifies a logical class of work with its own pool and policy.
///
/// Ids are assigned by the embedding application, are stable for the process
/// lifetime, and are never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskTypeId(pub u32);

impl fmt::Display for TaskTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TaskTypeId {
    fn from(id: u32) -> Self {
        TaskTypeId(id)
    }
}

// ============================================================================
// Pool Sizing
// ============================================================================

/// How large a task type's pool is allowed to grow.
///
/// The configuration surface keeps the historical sentinel encoding:
/// `-1` means no dedicated pool (callers run the work inline), `0` means
/// demand-driven growth with no cap, and any positive value is a hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSizePolicy {
    /// No dedicated pool; submissions are handed back to the caller.
    NoPool,
    /// Demand-driven growth with no upper bound.
    Unbounded,
    /// At most this many worker threads.
    Bounded(usize),
}

impl PoolSizePolicy {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            r if r < 0 => PoolSizePolicy::NoPool,
            0 => PoolSizePolicy::Unbounded,
            n => PoolSizePolicy::Bounded(n as usize),
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            PoolSizePolicy::NoPool => -1,
            PoolSizePolicy::Unbounded => 0,
            PoolSizePolicy::Bounded(n) => n as i64,
        }
    }

    /// Whether a pool currently running `thread_count` workers may add one more.
    pub fn allows_growth(self, thread_count: usize) -> bool {
        match self {
            PoolSizePolicy::NoPool => false,
            PoolSizePolicy::Unbounded => true,
            PoolSizePolicy::Bounded(max) => thread_count < max,
        }
    }

    pub fn max_threads(self) -> Option<usize> {
        match self {
            PoolSizePolicy::Bounded(max) => Some(max),
            _ => None,
        }
    }
}

impl Serialize for PoolSizePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_raw())
    }
}

impl<'de> Deserialize<'de> for PoolSizePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(PoolSizePolicy::from_raw(i64::deserialize(deserializer)?))
    }
}

// ============================================================================
// Resolved Per-Task Policy
// ============================================================================

/// The fully resolved configuration for one task type.
///
/// Resolved exactly once, at scheduler-context construction, from
/// [`SchedulerSettings`]; immutable for the process lifetime. Hot reload is
/// deliberately unsupported for pool policy.
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    pub task_type: TaskTypeId,
    pub size: PoolSizePolicy,
    /// Backlog (active + queued, relative to live threads) at which the
    /// booster is offered work on submission.
    pub booster_threshold: usize,
    /// Whether compatible queued tasks may be merged before execution.
    pub combine_tasks: bool,
    /// Queue depth that must remain before combination is attempted.
    pub combine_threshold: usize,
    /// Whether the booster's immediate harvest may drain the whole backlog
    /// rather than pulling a single task.
    pub consume_backlog: bool,
    /// Whether the booster's round-robin scavenge scan may steal from this
    /// pool. Independent of `consume_backlog`.
    pub scavenge_eligible: bool,
    /// Booster is enabled globally and this task type is not excluded.
    pub boosted: bool,
}

// ============================================================================
// Observability Snapshots
// ============================================================================

/// Point-in-time statistics for one worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub task_type: TaskTypeId,
    pub size_policy: PoolSizePolicy,
    pub thread_count: usize,
    pub active_threads: usize,
    pub queue_depth: usize,
    pub combined_tasks: u64,
    pub completed_tasks: u64,
}

/// Point-in-time statistics for the shared booster pool.
#[derive(Debug, Clone, Serialize)]
pub struct BoosterStats {
    /// Currently enabled thread slots (dynamic, `<= max_size`).
    pub eff_size: usize,
    pub max_size: usize,
    pub thread_count: usize,
    pub active_threads: usize,
    pub queue_depth: usize,
    pub harvested_tasks: u64,
    pub member_count: usize,
}

/// Aggregated snapshot across a scheduler context.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub pools: Vec<PoolStats>,
    pub booster: Option<BoosterStats>,
    /// Sum of `active_threads` over all pools.
    pub total_active_threads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_policy_sentinels_round_trip() {
        assert_eq!(PoolSizePolicy::from_raw(-1), PoolSizePolicy::NoPool);
        assert_eq!(PoolSizePolicy::from_raw(-7), PoolSizePolicy::NoPool);
        assert_eq!(PoolSizePolicy::from_raw(0), PoolSizePolicy::Unbounded);
        assert_eq!(PoolSizePolicy::from_raw(4), PoolSizePolicy::Bounded(4));

        assert_eq!(PoolSizePolicy::NoPool.as_raw(), -1);
        assert_eq!(PoolSizePolicy::Unbounded.as_raw(), 0);
        assert_eq!(PoolSizePolicy::Bounded(4).as_raw(), 4);
    }

    #[test]
    fn size_policy_growth_rules() {
        assert!(!PoolSizePolicy::NoPool.allows_growth(0));
        assert!(PoolSizePolicy::Unbounded.allows_growth(10_000));
        assert!(PoolSizePolicy::Bounded(2).allows_growth(1));
        assert!(!PoolSizePolicy::Bounded(2).allows_growth(2));
    }
}
