//! Worker thread pool for blocking or CPU-bound jobs.
//!
//! Jobs run synchronously on dedicated workers; the only coupling back to
//! the async world is a waker posted through the scheduler queue when a
//! [`spawn_blocking`](ThreadPool::spawn_blocking) job finishes.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::runtime::RuntimeConfig;
use crate::scheduler;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

type PoolJob = Box<dyn FnOnce() + Send>;

struct PoolQueue {
    jobs: VecDeque<PoolJob>,
    stopped: bool,
}

struct PoolShared {
    scheduler: scheduler::Handle,
    queue: Mutex<PoolQueue>,
    cv: Condvar,
}

/// A fixed-size pool of worker threads executing opaque blocking jobs.
///
/// After [`stop`](ThreadPool::stop) no new work is accepted; jobs already
/// queued or in flight run to completion, and dropping the pool joins the
/// workers.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    pub(crate) fn new(scheduler: scheduler::Handle, cfg: &RuntimeConfig) -> Self {
        let shared = Arc::new(PoolShared {
            scheduler,
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
        });

        let workers = (0..cfg.worker_threads)
            .map(|i| {
                let shared = shared.clone();
                let name_fn = cfg.thread_name.clone();
                cfg.thread_builder(&format!("pool-{i}"))
                    .spawn(move || {
                        apply_thread_name(&(name_fn.0)());
                        worker_loop(&shared);
                    })
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Fire-and-forget: run `f` on some worker.
    ///
    /// Silently a no-op once the pool is stopped. A panicking job is caught
    /// and logged; it never takes a worker down.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f));
    }

    /// Run `f` on a worker and await its result from the async world.
    ///
    /// The job is enqueued immediately; the returned future resolves once a
    /// worker has run it and the completion has bounced through the
    /// scheduler queue. `token` is observed on the worker right before the
    /// callable would run: a cancelled job fails with `canceled` without
    /// executing. Cancellation is never delivered mid-execution.
    ///
    /// Submitting to a stopped pool resolves with `rejected`. A panic inside
    /// `f` is captured and resumes unwinding in the awaiter.
    pub fn spawn_blocking<F, R>(&self, f: F, token: CancelToken) -> Blocking<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::new(Mutex::new(BlockingState {
            outcome: None,
            waker: None,
        }));

        let job_state = state.clone();
        let job_scheduler = self.shared.scheduler.clone();
        let accepted = self.enqueue(Box::new(move || {
            let outcome = if token.is_cancelled() {
                Err(Error::canceled())
            } else {
                Ok(panic::catch_unwind(AssertUnwindSafe(f)))
            };

            let waker = {
                let mut state = job_state.lock();
                state.outcome = Some(outcome);
                state.waker.take()
            };
            if let Some(waker) = waker {
                // Bounce the resumption through the scheduler so the
                // awaiting task continues on its own thread.
                job_scheduler.post(move || waker.wake());
            }
        }));

        if !accepted {
            state.lock().outcome = Some(Err(Error::rejected()));
        }

        Blocking { state }
    }

    /// Close intake. Queued and in-flight jobs still run; workers exit once
    /// the queue drains. Idempotent and non-blocking.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopped = true;
        }
        self.shared.cv.notify_all();
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    fn enqueue(&self, job: PoolJob) -> bool {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopped {
                return false;
            }
            queue.jobs.push_back(job);
        }
        self.shared.cv.notify_one();
        true
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Rename the calling worker with the configured name. Kernel thread names
/// cap at 16 bytes including the terminator; longer names are truncated.
#[cfg(target_os = "linux")]
fn apply_thread_name(name: &str) {
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(15);
    let Ok(c_name) = std::ffi::CString::new(bytes) else {
        return;
    };
    unsafe {
        libc::pthread_setname_np(libc::pthread_self(), c_name.as_ptr());
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_thread_name(_name: &str) {}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.stopped {
                    break None;
                }
                shared.cv.wait(&mut queue);
            }
        };

        let Some(job) = job else { return };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(
                "blocking job panicked: {}",
                crate::task::panic_message(&payload)
            );
        }
    }
}

struct BlockingState<R> {
    // Ok(Ok(value)): job ran and returned.
    // Ok(Err(payload)): job panicked; resumed on await.
    // Err(error): canceled before running, or pool stopped.
    outcome: Option<Result<thread::Result<R>, Error>>,
    waker: Option<Waker>,
}

/// Future returned by [`ThreadPool::spawn_blocking`].
pub struct Blocking<R> {
    state: Arc<Mutex<BlockingState<R>>>,
}

impl<R> Future for Blocking<R> {
    type Output = Result<R, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();

        match state.outcome.take() {
            Some(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Some(Ok(Err(payload))) => panic::resume_unwind(payload),
            Some(Err(error)) => Poll::Ready(Err(error)),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<R> fmt::Debug for Blocking<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocking").finish_non_exhaustive()
    }
}
