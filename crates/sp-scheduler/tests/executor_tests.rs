//! TaskExecutor Tests
//!
//! Tests for:
//! - Submit-and-wait batch semantics
//! - Inline execution for task types without a pool
//! - Drop blocking until the batch completes
//! - Error propagation after shutdown

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sp_scheduler::{
    SchedulerContext, SchedulerError, SchedulerSettings, TaskExecutor, TaskSettings, TaskTypeId,
};

const TASK_A: TaskTypeId = TaskTypeId(1);

fn context_with_pool_size(size: i64) -> Arc<SchedulerContext> {
    SchedulerContext::new(SchedulerSettings {
        tasks: vec![TaskSettings {
            size: Some(size),
            ..TaskSettings::new(TASK_A.0)
        }],
        ..SchedulerSettings::default()
    })
}

#[test]
fn wait_blocks_until_the_batch_completes() {
    let ctx = context_with_pool_size(2);
    let executor = TaskExecutor::new(ctx.clone(), TASK_A);
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let completed = completed.clone();
        executor
            .submit(move || {
                std::thread::sleep(Duration::from_millis(5));
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    executor.wait();
    assert_eq!(completed.load(Ordering::SeqCst), 20);
    assert_eq!(executor.outstanding(), 0);

    ctx.shutdown();
}

#[test]
fn no_pool_type_runs_inline_on_the_submitting_thread() {
    let ctx = context_with_pool_size(-1);
    let executor = TaskExecutor::new(ctx.clone(), TASK_A);

    let submitter = std::thread::current().id();
    let ran_on = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for _ in 0..5 {
        let ran_on = ran_on.clone();
        executor
            .submit(move || ran_on.lock().push(std::thread::current().id()))
            .unwrap();
    }

    // inline execution completes before submit returns
    assert_eq!(executor.outstanding(), 0);
    let threads = ran_on.lock().clone();
    assert_eq!(threads.len(), 5);
    assert!(threads.iter().all(|id| *id == submitter));

    ctx.shutdown();
}

#[test]
fn drop_waits_for_outstanding_tasks() {
    let ctx = context_with_pool_size(1);
    let completed = Arc::new(AtomicUsize::new(0));

    {
        let executor = TaskExecutor::new(ctx.clone(), TASK_A);
        for _ in 0..10 {
            let completed = completed.clone();
            executor
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        // executor drops here
    }

    assert_eq!(completed.load(Ordering::SeqCst), 10);

    ctx.shutdown();
}

#[test]
fn submit_after_shutdown_propagates_the_error() {
    let ctx = context_with_pool_size(1);
    let executor = TaskExecutor::new(ctx.clone(), TASK_A);
    ctx.shutdown();

    let result = executor.submit(|| {});
    assert!(matches!(result, Err(SchedulerError::ShutdownInProgress)));
    // the failed submission is not left outstanding, so drop will not hang
    assert_eq!(executor.outstanding(), 0);
}

#[test]
fn executors_on_the_same_pool_track_independently() {
    let ctx = context_with_pool_size(2);
    let first = TaskExecutor::new(ctx.clone(), TASK_A);
    let second = TaskExecutor::new(ctx.clone(), TASK_A);
    let first_done = Arc::new(AtomicUsize::new(0));
    let second_done = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let done = first_done.clone();
        first.submit(move || { done.fetch_add(1, Ordering::SeqCst); }).unwrap();
        let done = second_done.clone();
        second.submit(move || { done.fetch_add(1, Ordering::SeqCst); }).unwrap();
    }

    first.wait();
    assert_eq!(first_done.load(Ordering::SeqCst), 8);
    second.wait();
    assert_eq!(second_done.load(Ordering::SeqCst), 8);

    ctx.shutdown();
}
