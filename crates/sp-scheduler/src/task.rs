//! Unit-of-work trait and task combination protocol.

use std::any::Any;

/// An opaque unit of work executed by a pool.
///
/// Implementations that opt into task combination must override both
/// [`Task::as_any_mut`] and [`Task::try_combine`]; combination is purely an
/// optimization and an absorbed combination must produce the net effect of
/// running both tasks.
pub trait Task: Send + 'static {
    /// Execute the task, consuming it.
    fn run(self: Box<Self>);

    /// Downcast hook for combination. The default opts out.
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }

    /// Attempt to absorb `other` into this task. The default rejects,
    /// returning ownership of `other` to the caller.
    fn try_combine(&mut self, other: Box<dyn Task>) -> CombineOutcome {
        CombineOutcome::Rejected(other)
    }
}

/// Result of a combination attempt.
pub enum CombineOutcome {
    /// `other` was merged into the receiver and must not be run separately.
    Absorbed,
    /// The receiver cannot absorb `other`.
    Rejected(Box<dyn Task>),
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// What a worker pulled off its pool.
///
/// `Exit` is the poison sentinel: it tells the worker to leave its pull
/// loop. It is produced once the pool starts joining and never corresponds
/// to queued user work.
pub(crate) enum WorkItem {
    Run(Box<dyn Task>),
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn closures_are_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let task: Box<dyn Task> = Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_combine_rejects() {
        let mut a: Box<dyn Task> = Box::new(|| {});
        let b: Box<dyn Task> = Box::new(|| {});
        assert!(matches!(a.try_combine(b), CombineOutcome::Rejected(_)));
    }
}
