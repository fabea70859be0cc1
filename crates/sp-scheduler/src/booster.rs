//! Shared elastic booster pool.
//!
//! The booster supplements per-task pools under load: it runs its own
//! queued work (handed over at submission time) and steals directly from
//! registered pools whose backlog exceeds their threshold. Its effective
//! size is retuned periodically from a measured concurrency signal.
//!
//! Lock-order contract (see also [`crate::pool::WorkerPool`]): a victim
//! pool's mutex is always acquired before the booster's own; during the
//! scavenge scan a candidate's mutex is taken to test eligibility and
//! released again before the slot check, so the state may change between
//! check and harvest. That race is tolerated: the harvest simply finds
//! nothing and the scan moves on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use sp_common::{BoosterSettings, BoosterStats};

use crate::meter::ConcurrencySource;
use crate::pool::{PoolState, WorkerPool};
use crate::task::Task;

/// How often an idle booster thread wakes to re-check its slot and the
/// idle timeout.
const IDLE_POLL: Duration = Duration::from_millis(100);

struct BoosterState {
    queue: VecDeque<Box<dyn Task>>,
    joining: bool,
}

/// The process-wide elastic reserve pool.
///
/// Slot capacity is fixed at `max_size`; the effective size (`eff_size`)
/// is the number of slots currently enabled. Threads in slots at or above
/// the effective size are retired: they pick up no new work and exit after
/// the idle timeout, so shrinking never interrupts a running task.
pub struct BoosterPool {
    settings: BoosterSettings,
    /// Back-reference handed to spawned booster threads.
    self_ref: Weak<BoosterPool>,
    state: Mutex<BoosterState>,
    work_ready: Condvar,
    slots: Mutex<Vec<Option<JoinHandle<()>>>>,
    eff_size: AtomicUsize,
    thread_count: AtomicUsize,
    active_threads: AtomicUsize,
    harvested_tasks: AtomicU64,
    members: Mutex<Vec<Weak<WorkerPool>>>,
    scan_cursor: AtomicUsize,
    ticks: AtomicU32,
    concurrency: Arc<dyn ConcurrencySource>,
}

impl BoosterPool {
    pub(crate) fn new(
        settings: BoosterSettings,
        concurrency: Arc<dyn ConcurrencySource>,
    ) -> Arc<Self> {
        let initial = settings.start_size.min(settings.max_size);
        let booster = Arc::new_cyclic(|self_ref| Self {
            slots: Mutex::new((0..settings.max_size).map(|_| None).collect()),
            settings,
            self_ref: self_ref.clone(),
            state: Mutex::new(BoosterState {
                queue: VecDeque::new(),
                joining: false,
            }),
            work_ready: Condvar::new(),
            eff_size: AtomicUsize::new(initial),
            thread_count: AtomicUsize::new(0),
            active_threads: AtomicUsize::new(0),
            harvested_tasks: AtomicU64::new(0),
            members: Mutex::new(Vec::new()),
            scan_cursor: AtomicUsize::new(0),
            ticks: AtomicU32::new(0),
            concurrency,
        });
        booster.ensure_threads(initial);
        info!(eff_size = initial, max_size = booster.settings.max_size, "Booster pool started");
        booster
    }

    /// Add a member pool to the scavenge scan. Guarded by a dedicated
    /// mutex, independent of any pool's own lock.
    pub(crate) fn register(&self, pool: &Arc<WorkerPool>) {
        self.members.lock().push(Arc::downgrade(pool));
        debug!(task_type = %pool.policy().task_type, "Registered pool with booster");
    }

    pub(crate) fn unregister(&self, pool: &WorkerPool) {
        self.members
            .lock()
            .retain(|weak| weak.upgrade().is_some_and(|p| !std::ptr::eq(&*p, pool)));
    }

    /// Immediate harvest, invoked from a pool's `submit` while the caller
    /// holds the victim's mutex. Pulls one task into the booster's own
    /// queue as long as the booster has spare capacity; a victim whose
    /// policy allows consuming the backlog is drained instead.
    pub(crate) fn run_immediately(&self, victim: &WorkerPool, victim_state: &mut PoolState) {
        let mut state = self.state.lock();
        self.adjust();

        let mut pulled = 0u64;
        loop {
            if victim_state.queue.is_empty() {
                break;
            }
            let eff = self.eff_size.load(Ordering::Relaxed);
            let busy = self.active_threads.load(Ordering::Relaxed) + state.queue.len();
            if eff <= busy {
                break;
            }
            let Some(task) = victim.harvest_one(victim_state) else {
                break;
            };
            state.queue.push_back(task);
            pulled += 1;
            if !victim.policy().consume_backlog {
                break;
            }
        }

        if pulled > 0 {
            self.harvested_tasks.fetch_add(pulled, Ordering::Relaxed);
            counter!("sp_booster_tasks_harvested").increment(pulled);
            trace!(
                task_type = %victim.policy().task_type,
                pulled,
                "Booster accepted backlog"
            );
            drop(state);
            self.work_ready.notify_one();
        }
    }

    /// Tick-driven adaptive resize. Every `adjustment_period` submissions
    /// the effective size is recomputed from the concurrency signal mapped
    /// through the size curve. Growth enables and populates new slots;
    /// shrink is capped by the number of currently idle threads and takes
    /// effect through idle self-retirement, never by interrupting work.
    fn adjust(&self) {
        let period = self.settings.adjustment_period;
        if period == 0 {
            return;
        }
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % period != 0 {
            return;
        }

        let concurrency = self.concurrency.measured_concurrency();
        let target = self.settings.target_size(concurrency);
        let current = self.eff_size.load(Ordering::Relaxed);

        if target > current {
            self.eff_size.store(target, Ordering::Relaxed);
            self.ensure_threads(target);
            debug!(concurrency, from = current, to = target, "Booster grew");
        } else if target < current {
            let active = self.active_threads.load(Ordering::Relaxed);
            let idle = self.thread_count.load(Ordering::Relaxed).saturating_sub(active);
            let new_size = target.max(current.saturating_sub(idle));
            if new_size < current {
                self.eff_size.store(new_size, Ordering::Relaxed);
                debug!(concurrency, from = current, to = new_size, "Booster shrank");
            }
        }
        gauge!("sp_booster_eff_size").set(self.eff_size.load(Ordering::Relaxed) as f64);
    }

    /// Populate every empty slot below `upto` with a live thread.
    fn ensure_threads(&self, upto: usize) {
        let mut slots = self.slots.lock();
        let upto = upto.min(slots.len());
        for id in 0..upto {
            if slots[id].is_some() {
                continue;
            }
            let Some(booster) = self.self_ref.upgrade() else {
                return;
            };
            let name = format!("sp-booster-{id}");
            match thread::Builder::new().name(name).spawn(move || booster.worker_loop(id)) {
                Ok(handle) => {
                    self.thread_count.fetch_add(1, Ordering::Relaxed);
                    slots[id] = Some(handle);
                }
                Err(error) => {
                    warn!(slot = id, %error, "Failed to spawn booster thread");
                }
            }
        }
    }

    /// Pull loop for the booster thread in slot `id`: own queue first, then
    /// a round-robin scavenge over member pools, then a timed wait. A
    /// thread whose slot is at or above the effective size picks up no new
    /// work and retires once idle past the timeout.
    fn worker_loop(self: Arc<Self>, id: usize) {
        let idle_timeout = Duration::from_secs(self.settings.idle_timeout_secs);
        let mut idle_since = Instant::now();
        loop {
            let own = {
                let mut state = self.state.lock();
                if state.joining {
                    break;
                }
                if id < self.eff_size.load(Ordering::Relaxed) {
                    state.queue.pop_front()
                } else {
                    None
                }
            };
            if let Some(task) = own {
                self.execute(task);
                idle_since = Instant::now();
                continue;
            }

            if id < self.eff_size.load(Ordering::Relaxed) {
                if let Some(task) = self.scavenge(id) {
                    self.execute(task);
                    idle_since = Instant::now();
                    continue;
                }
            }

            {
                let mut state = self.state.lock();
                if state.joining {
                    break;
                }
                let _ = self.work_ready.wait_for(&mut state, IDLE_POLL);
            }
            if id >= self.eff_size.load(Ordering::Relaxed)
                && idle_since.elapsed() >= idle_timeout
            {
                // self-retire: empty the slot so a later grow can refill it
                self.thread_count.fetch_sub(1, Ordering::Relaxed);
                if let Some(slot) = self.slots.lock().get_mut(id) {
                    *slot = None;
                }
                debug!(slot = id, "Booster thread retired");
                return;
            }
        }
        self.thread_count.fetch_sub(1, Ordering::Relaxed);
        trace!(slot = id, "Booster thread exited");
    }

    /// One round-robin pass over the registered pools, starting from a
    /// rotating offset. Eligibility is tested under the candidate's lock,
    /// which is released before the slot re-check; the candidate is then
    /// re-locked for the harvest, tolerating whatever changed in between.
    fn scavenge(&self, id: usize) -> Option<Box<dyn Task>> {
        let members: Vec<Arc<WorkerPool>> = {
            let mut list = self.members.lock();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        if members.is_empty() {
            return None;
        }

        let start = self.scan_cursor.fetch_add(1, Ordering::Relaxed) % members.len();
        for offset in 0..members.len() {
            let pool = &members[(start + offset) % members.len()];
            let eligible = {
                let state = pool.state().lock();
                pool.can_donate(&state)
            };
            if !eligible {
                continue;
            }
            // this slot may have been retired while we scanned
            if id >= self.eff_size.load(Ordering::Relaxed) {
                return None;
            }
            let mut state = pool.state().lock();
            if !pool.can_donate(&state) {
                continue;
            }
            if let Some(task) = pool.harvest_one(&mut state) {
                drop(state);
                self.harvested_tasks.fetch_add(1, Ordering::Relaxed);
                counter!("sp_booster_tasks_harvested").increment(1);
                trace!(task_type = %pool.policy().task_type, slot = id, "Booster stole task");
                return Some(task);
            }
        }
        None
    }

    fn execute(&self, task: Box<dyn Task>) {
        self.active_threads.fetch_add(1, Ordering::Relaxed);
        task.run();
        self.active_threads.fetch_sub(1, Ordering::Relaxed);
    }

    /// Mark the booster as joining, wake everything, and join all live
    /// threads. Queued-but-undrained tasks are dropped. Idempotent.
    pub(crate) fn join(&self) {
        {
            let mut state = self.state.lock();
            state.joining = true;
        }
        self.work_ready.notify_all();
        let handles: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock();
            slots.iter_mut().filter_map(Option::take).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        self.state.lock().queue.clear();
        debug!("Booster pool joined");
    }

    pub fn eff_size(&self) -> usize {
        self.eff_size.load(Ordering::Relaxed)
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

    pub fn harvested_tasks(&self) -> u64 {
        self.harvested_tasks.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BoosterStats {
        BoosterStats {
            eff_size: self.eff_size(),
            max_size: self.settings.max_size,
            thread_count: self.thread_count(),
            active_threads: self.active_threads(),
            queue_depth: self.queue_depth(),
            harvested_tasks: self.harvested_tasks(),
            member_count: self.members.lock().len(),
        }
    }
}
