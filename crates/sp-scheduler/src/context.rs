//! Scheduler context: the explicit process-wide pool registry.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::{debug, info};

use sp_common::{PoolSizePolicy, SchedulerSettings, SchedulerStats, TaskTypeId};

use crate::booster::BoosterPool;
use crate::error::SchedulerError;
use crate::meter::{ActiveThreadMeter, ConcurrencySource};
use crate::pool::WorkerPool;
use crate::task::Task;
use crate::Result;

/// What happened to a submission.
pub enum Submission {
    /// The task was enqueued on the task type's pool.
    Queued,
    /// The task type has no pool; the task is handed back and the caller
    /// runs it inline.
    Inline(Box<dyn Task>),
}

/// Owns every worker pool and the booster singleton for one scheduler
/// instance.
///
/// Settings are resolved once at construction and immutable afterwards.
/// Pools are created lazily on first use and live until [`shutdown`], which
/// is also run on drop; separate contexts are fully isolated, so tests can
/// run several side by side.
///
/// [`shutdown`]: SchedulerContext::shutdown
pub struct SchedulerContext {
    settings: SchedulerSettings,
    pools: DashMap<TaskTypeId, Arc<WorkerPool>>,
    booster: OnceLock<Option<Arc<BoosterPool>>>,
    meter: Arc<ActiveThreadMeter>,
    concurrency: Arc<dyn ConcurrencySource>,
    shutdown: AtomicBool,
}

impl SchedulerContext {
    pub fn new(settings: SchedulerSettings) -> Arc<Self> {
        let meter = Arc::new(ActiveThreadMeter::new());
        Self::build(settings, meter.clone(), meter)
    }

    /// Use a custom concurrency signal for the booster's adaptive sizing
    /// instead of the built-in active-thread meter.
    pub fn with_concurrency_source(
        settings: SchedulerSettings,
        concurrency: Arc<dyn ConcurrencySource>,
    ) -> Arc<Self> {
        Self::build(settings, Arc::new(ActiveThreadMeter::new()), concurrency)
    }

    /// Load, validate, and construct from a TOML settings file.
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let settings = SchedulerSettings::from_path(path)?;
        Ok(Self::new(settings))
    }

    fn build(
        settings: SchedulerSettings,
        meter: Arc<ActiveThreadMeter>,
        concurrency: Arc<dyn ConcurrencySource>,
    ) -> Arc<Self> {
        info!(
            booster_enabled = settings.booster.enabled,
            configured_tasks = settings.tasks.len(),
            "Scheduler context created"
        );
        Arc::new(Self {
            settings,
            pools: DashMap::new(),
            booster: OnceLock::new(),
            meter,
            concurrency,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Resolve (or lazily create) the pool for a task type. `None` means
    /// the type is configured without a pool and work must run inline.
    pub fn pool(&self, task_type: TaskTypeId) -> Option<Arc<WorkerPool>> {
        if let Some(pool) = self.pools.get(&task_type) {
            return Some(pool.clone());
        }

        let policy = self.settings.resolve(task_type);
        if policy.size == PoolSizePolicy::NoPool {
            return None;
        }

        let pool = self
            .pools
            .entry(task_type)
            .or_insert_with(|| {
                let booster = if policy.boosted { self.booster() } else { None };
                let pool = WorkerPool::new(policy.clone(), booster.clone(), self.meter.clone());
                if let Some(booster) = &booster {
                    booster.register(&pool);
                }
                info!(
                    task_type = %task_type,
                    size = policy.size.as_raw(),
                    boosted = policy.boosted,
                    "Created worker pool"
                );
                pool
            })
            .clone();
        Some(pool)
    }

    /// The booster singleton: created once, on the first boosted pool.
    fn booster(&self) -> Option<Arc<BoosterPool>> {
        self.booster
            .get_or_init(|| {
                if self.settings.booster.enabled {
                    Some(BoosterPool::new(
                        self.settings.booster.clone(),
                        self.concurrency.clone(),
                    ))
                } else {
                    None
                }
            })
            .clone()
    }

    /// Submit work for a task type. `priority` pushes to the front of the
    /// queue. Returns [`Submission::Inline`] when the type has no pool.
    pub fn submit(
        &self,
        task_type: TaskTypeId,
        task: Box<dyn Task>,
        priority: bool,
    ) -> Result<Submission> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutdownInProgress);
        }
        match self.pool(task_type) {
            Some(pool) => {
                pool.submit(task, priority);
                Ok(Submission::Queued)
            }
            None => Ok(Submission::Inline(task)),
        }
    }

    pub fn active_thread_count(&self, task_type: TaskTypeId) -> usize {
        self.pools
            .get(&task_type)
            .map(|pool| pool.active_threads())
            .unwrap_or(0)
    }

    pub fn queue_depth(&self, task_type: TaskTypeId) -> usize {
        self.pools
            .get(&task_type)
            .map(|pool| pool.queue_depth())
            .unwrap_or(0)
    }

    /// Sum of active worker threads over every pool in this context.
    pub fn total_active_threads(&self) -> usize {
        self.pools.iter().map(|entry| entry.active_threads()).sum()
    }

    pub fn booster_stats(&self) -> Option<sp_common::BoosterStats> {
        self.booster.get()?.as_ref().map(|booster| booster.stats())
    }

    pub fn stats(&self) -> SchedulerStats {
        let pools: Vec<_> = self.pools.iter().map(|entry| entry.stats()).collect();
        let total_active_threads = pools.iter().map(|p| p.active_threads).sum();
        SchedulerStats {
            pools,
            booster: self.booster_stats(),
            total_active_threads,
        }
    }

    /// Join every pool, then the booster. Queued-but-undrained work is
    /// dropped; in-flight work finishes. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Scheduler context shutting down");
        for entry in self.pools.iter() {
            entry.join();
        }
        if let Some(Some(booster)) = self.booster.get() {
            for entry in self.pools.iter() {
                booster.unregister(entry.value());
            }
            booster.join();
        }
        debug!("Scheduler context shut down");
    }
}

impl Drop for SchedulerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
