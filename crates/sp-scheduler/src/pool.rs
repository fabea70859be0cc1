//! Per-task-type worker pool with demand-driven thread growth.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use metrics::counter;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use sp_common::{PoolStats, TaskPolicy};

use crate::booster::BoosterPool;
use crate::meter::ActiveThreadMeter;
use crate::queue::WorkQueue;
use crate::task::{CombineOutcome, Task, WorkItem};

/// State guarded by the pool mutex. The queue has no lock of its own, so
/// the whole submission decision runs as one critical section.
pub(crate) struct PoolState {
    pub(crate) queue: WorkQueue,
    pub(crate) joining: bool,
}

/// Worker pool for a single task type.
///
/// Threads are spawned lazily, one per submission at most, only while the
/// existing set is saturated by active plus queued work, and never beyond
/// the policy cap. Cooperates with an optional shared [`BoosterPool`].
///
/// Lock-order contract: a pool's own mutex is always acquired *before* the
/// booster's (`submit` -> `run_immediately`), and the booster's scavenge
/// scan never holds its own lock while taking a pool's. Do not introduce a
/// path that acquires a pool lock while holding the booster lock.
pub struct WorkerPool {
    policy: TaskPolicy,
    /// Back-reference handed to spawned worker threads.
    self_ref: Weak<WorkerPool>,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_count: AtomicUsize,
    active_threads: AtomicUsize,
    combined_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    booster: Option<Arc<BoosterPool>>,
    meter: Arc<ActiveThreadMeter>,
}

impl WorkerPool {
    pub(crate) fn new(
        policy: TaskPolicy,
        booster: Option<Arc<BoosterPool>>,
        meter: Arc<ActiveThreadMeter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            policy,
            self_ref: self_ref.clone(),
            state: Mutex::new(PoolState {
                queue: WorkQueue::new(),
                joining: false,
            }),
            work_ready: Condvar::new(),
            handles: Mutex::new(Vec::new()),
            thread_count: AtomicUsize::new(0),
            active_threads: AtomicUsize::new(0),
            combined_tasks: AtomicU64::new(0),
            completed_tasks: AtomicU64::new(0),
            booster,
            meter,
        })
    }

    pub fn policy(&self) -> &TaskPolicy {
        &self.policy
    }

    /// Enqueue one task; `front` jumps the queue (priority/requeued work).
    ///
    /// Never blocks beyond the pool mutex. A failed thread spawn degrades
    /// softly: the submission still lands and the queue backs up.
    pub fn submit(&self, task: Box<dyn Task>, front: bool) {
        let mut state = self.state.lock();
        if state.joining {
            warn!(task_type = %self.policy.task_type, "Submission dropped, pool is joining");
            return;
        }

        let threads = self.thread_count.load(Ordering::Relaxed);
        let active = self.active_threads.load(Ordering::Relaxed);
        if self.policy.size.allows_growth(threads) && threads <= active + state.queue.len() {
            self.spawn_worker();
        }

        state.queue.push(task, front);
        counter!("sp_pool_tasks_submitted", "task_type" => self.policy.task_type.to_string())
            .increment(1);

        if let Some(booster) = &self.booster {
            let threads = self.thread_count.load(Ordering::Relaxed);
            let backlog = self.active_threads.load(Ordering::Relaxed) + state.queue.len();
            if backlog >= threads + self.policy.booster_threshold {
                // lock order: this pool's mutex first, booster's second
                booster.run_immediately(self, &mut state);
            }
        }

        drop(state);
        self.work_ready.notify_one();
    }

    /// Spawn exactly one worker thread. Caller holds the pool mutex.
    fn spawn_worker(&self) {
        let Some(pool) = self.self_ref.upgrade() else {
            return;
        };
        let slot = self.handles.lock().len();
        let name = format!("sp-worker-{}-{}", self.policy.task_type, slot);
        match thread::Builder::new().name(name).spawn(move || pool.worker_loop()) {
            Ok(handle) => {
                self.thread_count.fetch_add(1, Ordering::Relaxed);
                self.handles.lock().push(handle);
                debug!(
                    task_type = %self.policy.task_type,
                    threads = self.thread_count.load(Ordering::Relaxed),
                    "Spawned worker thread"
                );
            }
            Err(error) => {
                warn!(
                    task_type = %self.policy.task_type,
                    %error,
                    "Failed to spawn worker thread, queue will back up"
                );
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            // active_threads is incremented for every dequeue, including the
            // exit sentinel; both arms below decrement it.
            match self.dequeue_for_worker() {
                WorkItem::Run(task) => {
                    self.meter.task_started();
                    task.run();
                    self.meter.task_finished();
                    self.completed_tasks.fetch_add(1, Ordering::Relaxed);
                    self.active_threads.fetch_sub(1, Ordering::Relaxed);
                }
                WorkItem::Exit => {
                    self.active_threads.fetch_sub(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        self.thread_count.fetch_sub(1, Ordering::Relaxed);
        trace!(task_type = %self.policy.task_type, "Worker thread exited");
    }

    /// Block until work or shutdown. Joining wins over queued work: items
    /// still queued once the pool is joining are never run.
    fn dequeue_for_worker(&self) -> WorkItem {
        let mut state = self.state.lock();
        loop {
            if state.joining {
                self.active_threads.fetch_add(1, Ordering::Relaxed);
                return WorkItem::Exit;
            }
            if let Some(task) = state.queue.pop_front() {
                self.active_threads.fetch_add(1, Ordering::Relaxed);
                return WorkItem::Run(task);
            }
            self.work_ready.wait(&mut state);
        }
    }

    /// Whether the booster's scavenge scan may steal from this pool right
    /// now. Caller holds the pool mutex.
    pub(crate) fn can_donate(&self, state: &PoolState) -> bool {
        self.policy.scavenge_eligible
            && !state.joining
            && !state.queue.is_empty()
            && state.queue.len() + self.active_threads.load(Ordering::Relaxed)
                >= self.thread_count.load(Ordering::Relaxed) + self.policy.booster_threshold
    }

    /// Pop the front task for the booster, folding compatible queued tasks
    /// into it when the combine policy allows. Caller holds the pool mutex.
    pub(crate) fn harvest_one(&self, state: &mut PoolState) -> Option<Box<dyn Task>> {
        let mut task = state.queue.pop_front()?;
        if self.policy.combine_tasks {
            self.combine_pending(state, &mut task);
        }
        Some(task)
    }

    /// Merge queued tasks into `task` while the queue stays above the
    /// combine threshold and the front task agrees to be absorbed.
    fn combine_pending(&self, state: &mut PoolState, task: &mut Box<dyn Task>) {
        let mut combined = 0u64;
        while state.queue.len() > self.policy.combine_threshold {
            let Some(other) = state.queue.pop_front() else {
                break;
            };
            match task.try_combine(other) {
                CombineOutcome::Absorbed => combined += 1,
                CombineOutcome::Rejected(other) => {
                    state.queue.push(other, true);
                    break;
                }
            }
        }
        if combined > 0 {
            self.combined_tasks.fetch_add(combined, Ordering::Relaxed);
            counter!("sp_pool_tasks_combined", "task_type" => self.policy.task_type.to_string())
                .increment(combined);
            trace!(task_type = %self.policy.task_type, combined, "Combined queued tasks");
        }
    }

    pub(crate) fn state(&self) -> &Mutex<PoolState> {
        &self.state
    }

    /// Mark the pool as joining, wake every worker, and join them all.
    /// Queued-but-undrained tasks are dropped, not run; in-flight tasks
    /// finish normally. Idempotent.
    pub fn join(&self) {
        {
            let mut state = self.state.lock();
            state.joining = true;
        }
        self.work_ready.notify_all();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.state.lock().queue.clear();
        debug!(task_type = %self.policy.task_type, "Worker pool joined");
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Relaxed)
    }

    pub fn active_threads(&self) -> usize {
        self.active_threads.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn combined_tasks(&self) -> u64 {
        self.combined_tasks.load(Ordering::Relaxed)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.completed_tasks.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            task_type: self.policy.task_type,
            size_policy: self.policy.size,
            thread_count: self.thread_count(),
            active_threads: self.active_threads(),
            queue_depth: self.queue_depth(),
            combined_tasks: self.combined_tasks(),
            completed_tasks: self.completed_tasks(),
        }
    }
}
