use crate::scheduler::{Handle, Job, Runnable};
use crate::task::Id;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread;

// Lifecycle of a started frame. Transitions are single-fire: a frame is
// never in the run queue twice and never polled concurrently.
//
//   SCHEDULED -> RUNNING -> IDLE -> SCHEDULED -> ... -> COMPLETE
//                      \-> NOTIFIED (woken mid-poll, re-queued by the runner)
const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

/// A scheduler-owned task frame.
///
/// Owns the future once [`Task::start`](crate::task::Task::start) has been
/// called, captures panics at the frame boundary, and implements the waker
/// that re-posts the frame onto its scheduler.
pub(crate) struct Harness<T> {
    id: Id,
    scheduler: Handle,
    state: AtomicU8,
    future: Mutex<Option<Pin<Box<dyn Future<Output = T> + Send>>>>,
    join: Mutex<JoinSlot<T>>,
}

pub(crate) struct JoinSlot<T> {
    pub(crate) result: Option<thread::Result<T>>,
    pub(crate) waker: Option<Waker>,
    pub(crate) detached: bool,
}

impl<T: Send + 'static> Harness<T> {
    pub(crate) fn new(
        id: Id,
        scheduler: Handle,
        future: Pin<Box<dyn Future<Output = T> + Send>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            scheduler,
            // Born SCHEDULED: the caller posts the first resumption right
            // after construction, so early wakes must be no-ops.
            state: AtomicU8::new(SCHEDULED),
            future: Mutex::new(Some(future)),
            join: Mutex::new(JoinSlot {
                result: None,
                waker: None,
                detached: false,
            }),
        })
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    pub(crate) fn join_slot(&self) -> &Mutex<JoinSlot<T>> {
        &self.join
    }

    fn schedule_wake(self: Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let scheduler = self.scheduler.clone();
                        scheduler.post_job(Job::Resume(self));
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        // The runner re-queues after the poll returns.
                        return;
                    }
                }
                // Already queued, already notified, or done.
                _ => return,
            }
        }
    }

    fn complete(&self, result: thread::Result<T>) {
        self.state.store(COMPLETE, Ordering::Release);

        let waker = {
            let mut join = self.join.lock();
            if join.detached {
                if let Err(payload) = &result {
                    tracing::error!(
                        task.id = %self.id,
                        "detached task panicked: {}",
                        panic_message(payload)
                    );
                }
                None
            } else {
                join.result = Some(result);
                join.waker.take()
            }
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: Send + 'static> Runnable for Harness<T> {
    fn run(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Stale queue entry; the frame moved on without us.
            return;
        }

        let Some(mut future) = self.future.lock().take() else {
            debug_assert!(false, "scheduled frame has no future");
            self.state.store(COMPLETE, Ordering::Release);
            return;
        };

        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);
        let poll = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        match poll {
            Ok(Poll::Pending) => {
                // Park the frame again before releasing RUNNING so a
                // concurrent wake always finds it in place.
                *self.future.lock() = Some(future);
                if self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken while polling: go around through the queue once
                    // more instead of looping here, preserving FIFO order.
                    self.state.store(SCHEDULED, Ordering::Release);
                    let scheduler = self.scheduler.clone();
                    scheduler.post_job(Job::Resume(self));
                }
            }
            Ok(Poll::Ready(value)) => self.complete(Ok(value)),
            Err(payload) => self.complete(Err(payload)),
        }
    }
}

impl<T: Send + 'static> Wake for Harness<T> {
    fn wake(self: Arc<Self>) {
        self.schedule_wake();
    }
}

/// Best-effort extraction of a panic payload for log lines.
pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
