use crate::scheduler;
use crate::task::harness::Harness;
use crate::task::{Id, JoinHandle};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A typed, suspendable computation that has not started yet.
///
/// Construction never polls the wrapped future, so a `Task` can be created,
/// stored and moved around freely before anything runs. There are exactly
/// two ways to consume one:
///
/// - **await it**: the awaiter polls the owned frame directly in its own
///   context, with no scheduler round-trip in either direction. The value
///   moves out on completion; a panic in the body unwinds into the awaiter.
/// - **[`start`](Task::start) it**: the frame moves onto the given
///   scheduler and runs concurrently. The returned [`JoinHandle`] observes
///   the outcome; dropping the handle detaches the task.
///
/// A `Task` may be awaited at most once. Dropping an unstarted task drops
/// the frame without ever running it.
///
/// ```no_run
/// use spindle::task::Task;
///
/// # async fn doc(sched: spindle::scheduler::Handle) {
/// let doubled = Task::new(async { 21 * 2 });
/// assert_eq!(doubled.await, 42);
///
/// let handle = Task::new(async { "done" }).start(&sched);
/// assert_eq!(handle.await.unwrap(), "done");
/// # }
/// ```
pub struct Task<T> {
    future: Pin<Box<dyn Future<Output = T> + Send + 'static>>,
}

impl<T> Task<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
        }
    }

    /// Move this task onto `scheduler` and post its first resumption.
    ///
    /// The scheduler owns the frame from here on; it is polled from the run
    /// loop and re-posted by its waker on every wakeup. The handle can be
    /// awaited once for the result, or dropped to let the task run detached.
    pub fn start(self, scheduler: &scheduler::Handle) -> JoinHandle<T>
    where
        T: Send + 'static,
    {
        let harness = Harness::new(Id::next(), scheduler.clone(), self.future);
        scheduler.post_job(scheduler::Job::Resume(harness.clone()));
        JoinHandle::new(harness)
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().future.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn poll_once<T>(task: &mut Task<T>) -> Poll<T> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(task).poll(&mut cx)
    }

    async fn compute() -> i32 {
        42
    }

    async fn add_one(value: i32) -> i32 {
        value + 1
    }

    #[test]
    fn test_awaiting_a_chain_hands_off_directly() {
        // Nested awaits complete in a single poll because child frames are
        // polled in place, never through a run queue.
        let mut task = Task::new(async { add_one(compute().await).await });
        assert_eq!(poll_once(&mut task), Poll::Ready(43));
    }

    #[test]
    fn test_construction_does_not_run_the_body() {
        let task = Task::new(async { panic!("never polled") });
        drop(task);
    }

    #[test]
    fn test_panic_unwinds_into_the_awaiter() {
        let mut task: Task<()> = Task::new(async { panic!("boom") });
        let err = catch_unwind(AssertUnwindSafe(|| poll_once(&mut task))).unwrap_err();
        let message = err.downcast_ref::<&str>().copied().unwrap_or_default();
        assert!(message.contains("boom"));
    }
}
