//! WorkerPool Unit Tests
//!
//! Tests for:
//! - FIFO ordering and priority submissions
//! - Demand-driven thread growth and capacity bounds
//! - Graceful shutdown behavior
//! - Registry memoization and the no-pool contract

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sp_scheduler::{
    SchedulerContext, SchedulerError, SchedulerSettings, Submission, TaskSettings, TaskTypeId,
};

const TASK_A: TaskTypeId = TaskTypeId(1);

/// Simple open/closed gate for holding worker threads in a task.
#[derive(Clone)]
struct Gate(Arc<(parking_lot::Mutex<bool>, parking_lot::Condvar)>);

impl Gate {
    fn new() -> Self {
        Gate(Arc::new((parking_lot::Mutex::new(false), parking_lot::Condvar::new())))
    }

    fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock();
        while !*open {
            cvar.wait(&mut open);
        }
    }
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn sized_task(id: u32, size: i64) -> TaskSettings {
    TaskSettings {
        size: Some(size),
        ..TaskSettings::new(id)
    }
}

fn settings_with(tasks: Vec<TaskSettings>) -> SchedulerSettings {
    SchedulerSettings {
        tasks,
        ..SchedulerSettings::default()
    }
}

#[test]
fn single_thread_pool_preserves_submission_order() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 1)]));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for i in 0..20u32 {
        let order = order.clone();
        ctx.submit(TASK_A, Box::new(move || order.lock().push(i)), false)
            .unwrap();
    }

    let pool = ctx.pool(TASK_A).unwrap();
    assert!(wait_until(Duration::from_secs(5), || pool.completed_tasks() == 20));
    assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());

    ctx.shutdown();
}

#[test]
fn priority_submission_jumps_the_queue() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 1)]));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let gate = Gate::new();
    let started = Arc::new(AtomicBool::new(false));

    {
        let gate = gate.clone();
        let started = started.clone();
        ctx.submit(
            TASK_A,
            Box::new(move || {
                started.store(true, Ordering::SeqCst);
                gate.wait();
            }),
            false,
        )
        .unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst)));

    for i in [1u32, 2] {
        let order = order.clone();
        ctx.submit(TASK_A, Box::new(move || order.lock().push(i)), false)
            .unwrap();
    }
    {
        let order = order.clone();
        ctx.submit(TASK_A, Box::new(move || order.lock().push(99)), true)
            .unwrap();
    }

    gate.open();
    let pool = ctx.pool(TASK_A).unwrap();
    assert!(wait_until(Duration::from_secs(5), || pool.completed_tasks() == 4));
    assert_eq!(*order.lock(), vec![99, 1, 2]);

    ctx.shutdown();
}

#[test]
fn bounded_pool_never_exceeds_capacity() {
    // maxSize=2, five 50ms tasks: at least ceil(5/2) serialized batches
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 2)]));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    for _ in 0..5 {
        let concurrent = concurrent.clone();
        let peak = peak.clone();
        ctx.submit(
            TASK_A,
            Box::new(move || {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }),
            false,
        )
        .unwrap();
    }

    let pool = ctx.pool(TASK_A).unwrap();
    assert!(wait_until(Duration::from_secs(5), || pool.completed_tasks() == 5));

    assert!(start.elapsed() >= Duration::from_millis(140));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(pool.thread_count() <= 2);

    ctx.shutdown();
}

#[test]
fn unbounded_pool_grows_with_demand_only() {
    // raw size 0 means no cap; growth stays demand-driven
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 0)]));
    let gate = Gate::new();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let gate = gate.clone();
        let done = done.clone();
        ctx.submit(
            TASK_A,
            Box::new(move || {
                gate.wait();
                done.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        )
        .unwrap();
    }

    let pool = ctx.pool(TASK_A).unwrap();
    assert!(wait_until(Duration::from_secs(5), || pool.thread_count() == 100));

    gate.open();
    assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 100));

    ctx.shutdown();
    assert_eq!(pool.thread_count(), 0);
    assert_eq!(pool.active_threads(), 0);
}

#[test]
fn shutdown_leaves_undrained_tasks_unexecuted() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 1)]));
    let gate = Gate::new();
    let started = Arc::new(AtomicBool::new(false));
    let executed = Arc::new(AtomicUsize::new(0));

    {
        let gate = gate.clone();
        let started = started.clone();
        ctx.submit(
            TASK_A,
            Box::new(move || {
                started.store(true, Ordering::SeqCst);
                gate.wait();
            }),
            false,
        )
        .unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst)));

    for _ in 0..5 {
        let executed = executed.clone();
        ctx.submit(
            TASK_A,
            Box::new(move || {
                executed.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        )
        .unwrap();
    }
    let pool = ctx.pool(TASK_A).unwrap();
    assert_eq!(pool.queue_depth(), 5);

    let ctx_clone = ctx.clone();
    let joiner = std::thread::spawn(move || ctx_clone.shutdown());

    // give shutdown time to mark the pool as joining, then release the worker
    std::thread::sleep(Duration::from_millis(100));
    gate.open();
    joiner.join().unwrap();

    // the queued tasks were dropped, not run, and stay dropped
    assert_eq!(executed.load(Ordering::SeqCst), 0);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(executed.load(Ordering::SeqCst), 0);
    assert_eq!(pool.thread_count(), 0);
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 1)]));
    ctx.shutdown();

    let result = ctx.submit(TASK_A, Box::new(|| {}), false);
    assert!(matches!(result, Err(SchedulerError::ShutdownInProgress)));
}

#[test]
fn no_pool_type_hands_the_task_back() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, -1)]));
    assert!(ctx.pool(TASK_A).is_none());

    let executed = Arc::new(AtomicUsize::new(0));
    let e = executed.clone();
    match ctx
        .submit(TASK_A, Box::new(move || { e.fetch_add(1, Ordering::SeqCst); }), false)
        .unwrap()
    {
        Submission::Inline(task) => task.run(),
        Submission::Queued => panic!("expected inline submission"),
    }
    assert_eq!(executed.load(Ordering::SeqCst), 1);

    ctx.shutdown();
}

#[test]
fn registry_memoizes_pools() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 2)]));
    let first = ctx.pool(TASK_A).unwrap();
    let second = ctx.pool(TASK_A).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    ctx.shutdown();
}

#[test]
fn stats_reflect_pool_state() {
    let ctx = SchedulerContext::new(settings_with(vec![sized_task(TASK_A.0, 2)]));
    for i in 0..4u32 {
        ctx.submit(TASK_A, Box::new(move || { let _ = i; }), false).unwrap();
    }
    let pool = ctx.pool(TASK_A).unwrap();
    assert!(wait_until(Duration::from_secs(5), || pool.completed_tasks() == 4));

    let stats = ctx.stats();
    assert_eq!(stats.pools.len(), 1);
    assert_eq!(stats.pools[0].task_type, TASK_A);
    assert_eq!(stats.pools[0].completed_tasks, 4);
    assert!(stats.booster.is_none());

    ctx.shutdown();
}
