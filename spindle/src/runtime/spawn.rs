//! Free functions for starting tasks on the current runtime.
//!
//! Both functions resolve the runtime through the thread-local context, so
//! they are usable from inside any task body (and from the thread driving
//! `run`/`block_on`), but panic elsewhere.

use crate::runtime::context;
use crate::task::{JoinHandle, Task};

/// Start `task` on the current runtime's scheduler.
///
/// ```no_run
/// use spindle::task::Task;
///
/// # async fn doc() {
/// let handle = spindle::spawn(Task::new(async { 5 + 3 }));
/// assert_eq!(handle.await.unwrap(), 8);
/// # }
/// ```
///
/// # Panics
///
/// Panics when called from a thread with no active runtime.
#[track_caller]
pub fn spawn<T>(task: Task<T>) -> JoinHandle<T>
where
    T: Send + 'static,
{
    context::current().spawn(task)
}

/// Start `task` detached on the current runtime's scheduler.
///
/// The task's result is discarded when it completes. A panic in the body is
/// captured and logged rather than propagated, keeping the scheduler alive.
///
/// # Panics
///
/// Panics when called from a thread with no active runtime.
#[track_caller]
pub fn spawn_detached<T>(task: Task<T>)
where
    T: Send + 'static,
{
    context::current().spawn_detached(task);
}
