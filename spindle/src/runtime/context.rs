//! Thread-local access to the runtime driving the current thread.
//!
//! Set for the duration of [`Runtime::run`](crate::runtime::Runtime::run)
//! and [`Runtime::block_on`](crate::runtime::Runtime::block_on), so task
//! bodies can reach the timer, pool and signal services without threading
//! handles through every call.

use crate::runtime::Handle;
use std::cell::RefCell;

thread_local! {
    static CONTEXT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// The runtime handle for the current thread.
///
/// # Panics
///
/// Panics when called from a thread that is not currently driving a
/// runtime, e.g. a bare `std::thread` or a blocking-pool worker.
#[track_caller]
pub fn current() -> Handle {
    try_current().expect("no spindle runtime is active on this thread")
}

/// Non-panicking variant of [`current`].
pub fn try_current() -> Option<Handle> {
    CONTEXT.with(|ctx| ctx.borrow().clone())
}

pub(crate) struct ContextGuard {
    prev: Option<Handle>,
}

pub(crate) fn enter(handle: Handle) -> ContextGuard {
    let prev = CONTEXT.with(|ctx| ctx.borrow_mut().replace(handle));
    ContextGuard { prev }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CONTEXT.with(|ctx| *ctx.borrow_mut() = prev);
    }
}
