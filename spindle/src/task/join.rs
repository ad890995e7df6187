use crate::task::harness::{Harness, panic_message};
use crate::task::Id;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// An owned permission to join on a started task.
///
/// Returned by [`Task::start`](crate::task::Task::start). The task runs
/// whether or not the handle is ever awaited; awaiting it resolves to the
/// task's value, or to a [`JoinError`] carrying the panic payload if the
/// body panicked.
///
/// Dropping the handle *detaches* the task: it keeps running, its result is
/// discarded on completion, and a panic is logged instead of propagated so
/// the scheduler stays alive.
///
/// A handle may be awaited at most once; awaiting an already-finished task
/// resolves immediately.
pub struct JoinHandle<T: Send + 'static> {
    harness: Arc<Harness<T>>,
}

impl<T: Send + 'static> JoinHandle<T> {
    pub(crate) fn new(harness: Arc<Harness<T>>) -> Self {
        Self { harness }
    }

    /// The [`Id`] of the underlying task.
    pub fn id(&self) -> Id {
        self.harness.id()
    }

    /// Whether the task has reached its terminal state.
    ///
    /// The result may still be in flight to an awaiter when this returns
    /// true.
    pub fn is_finished(&self) -> bool {
        self.harness.is_complete()
    }

    /// Explicitly detach the task. Equivalent to dropping the handle.
    pub fn detach(self) {}
}

impl<T: Send + 'static> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.harness.id();
        let mut join = self.harness.join_slot().lock();

        if let Some(result) = join.result.take() {
            return Poll::Ready(result.map_err(|payload| JoinError::new(id, payload)));
        }

        join.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T: Send + 'static> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        let mut join = self.harness.join_slot().lock();
        join.detached = true;
        // A result that was produced but never awaited is discarded here.
        join.result = None;
        join.waker = None;
    }
}

impl<T: Send + 'static> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.harness.id())
            .finish()
    }
}

/// Error returned when a joined task panicked.
///
/// Holds the original panic payload; call [`resume`](JoinError::resume) to
/// continue unwinding in the awaiter, or [`into_panic`](JoinError::into_panic)
/// to inspect it.
pub struct JoinError {
    id: Id,
    payload: Box<dyn Any + Send + 'static>,
}

impl JoinError {
    pub(crate) fn new(id: Id, payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    /// The captured panic payload.
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }

    /// Rethrow the captured panic on the current thread.
    pub fn resume(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} panicked: {}",
            self.id,
            panic_message(&self.payload)
        )
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinError")
            .field("id", &self.id)
            .field("message", &panic_message(&self.payload))
            .finish()
    }
}

impl std::error::Error for JoinError {}
