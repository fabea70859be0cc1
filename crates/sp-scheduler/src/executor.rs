//! Scoped submit-and-wait executor.
//!
//! Orchestration code typically fans a batch of work out to one task
//! type's pool and needs to block until the whole batch has run. The
//! executor wraps each submitted task with a completion tracker; `wait`
//! (and drop) block until every wrapped task has finished. Task types
//! configured without a pool run inline on the submitting thread.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use sp_common::TaskTypeId;

use crate::context::{SchedulerContext, Submission};
use crate::task::Task;
use crate::Result;

struct CompletionTracker {
    outstanding: Mutex<usize>,
    all_done: Condvar,
}

impl CompletionTracker {
    fn new() -> Self {
        Self {
            outstanding: Mutex::new(0),
            all_done: Condvar::new(),
        }
    }

    fn add_one(&self) {
        *self.outstanding.lock() += 1;
    }

    fn task_done(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.all_done.notify_all();
        }
    }

    fn wait(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.all_done.wait(&mut outstanding);
        }
    }

    fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }
}

/// Marks the tracker done when dropped. Held by the task wrapper from
/// submission on, so a task that is dropped undrained at shutdown (or that
/// panics mid-run) still counts as finished and cannot strand `wait`.
struct DoneGuard(Arc<CompletionTracker>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

/// Completion-tracking wrapper. Opts out of combination: the inner task is
/// type-erased, so merging is left to direct pool submissions.
struct TrackedTask {
    inner: Box<dyn Task>,
    guard: DoneGuard,
}

impl Task for TrackedTask {
    fn run(self: Box<Self>) {
        let this = *self;
        let _guard = this.guard;
        this.inner.run();
    }
}

/// Submits work for one task type and waits for all of it to complete.
pub struct TaskExecutor {
    ctx: Arc<SchedulerContext>,
    task_type: TaskTypeId,
    tracker: Arc<CompletionTracker>,
}

impl TaskExecutor {
    pub fn new(ctx: Arc<SchedulerContext>, task_type: TaskTypeId) -> Self {
        Self {
            ctx,
            task_type,
            tracker: Arc::new(CompletionTracker::new()),
        }
    }

    pub fn task_type(&self) -> TaskTypeId {
        self.task_type
    }

    pub fn submit<T: Task>(&self, task: T) -> Result<()> {
        self.submit_boxed(Box::new(task), false)
    }

    /// Front-of-queue submission, for requeued or otherwise urgent work.
    pub fn submit_priority<T: Task>(&self, task: T) -> Result<()> {
        self.submit_boxed(Box::new(task), true)
    }

    pub fn submit_boxed(&self, task: Box<dyn Task>, priority: bool) -> Result<()> {
        self.tracker.add_one();
        let tracked = Box::new(TrackedTask {
            inner: task,
            guard: DoneGuard(self.tracker.clone()),
        });
        // on error the rejected task is dropped and its guard settles the
        // tracker, so the failed submission is not left outstanding
        match self.ctx.submit(self.task_type, tracked, priority)? {
            Submission::Queued => Ok(()),
            Submission::Inline(task) => {
                // no pool for this type: run on the submitting thread
                task.run();
                Ok(())
            }
        }
    }

    /// Block until every task submitted through this executor has run.
    pub fn wait(&self) {
        self.tracker.wait();
    }

    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.tracker.wait();
    }
}
