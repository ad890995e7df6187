//! The single-threaded cooperative scheduler.
//!
//! One FIFO run queue, one mutex, one condvar. Everything else in the crate
//! reduces its cross-thread needs to a single primitive: do the blocking
//! step somewhere else, then [`post`](Scheduler::post) the continuation
//! back. Jobs posted from one thread execute in post order; jobs posted
//! concurrently from several threads are serialized by the queue lock with
//! no fairness guarantee between posters.

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

mod queue;
pub(crate) use queue::{Job, Runnable, RunQueue};

/// A FIFO run loop for task resumptions and one-shot callables.
///
/// Created with [`Scheduler::new`] and usually wrapped into a [`Handle`]
/// right away so it can be shared with worker threads. Exactly one thread
/// may be inside [`run`](Scheduler::run) at a time.
#[derive(Debug)]
pub struct Scheduler {
    queue: Mutex<RunQueue>,
    cv: Condvar,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(RunQueue::default()),
            cv: Condvar::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn into_handle(self) -> Handle {
        Handle(Arc::new(self))
    }

    /// Append a callable to the tail of the run queue and wake one waiter.
    ///
    /// Safe to call from any thread, including from inside a running job.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_job(Job::Run(Box::new(f)));
    }

    pub(crate) fn post_job(&self, job: Job) {
        {
            let mut queue = self.queue.lock();
            queue.jobs.push_back(job);
        }
        self.cv.notify_one();
    }

    /// Drive the run loop on the calling thread.
    ///
    /// Pops one job at a time and executes it outside the lock. Returns once
    /// [`stop`](Scheduler::stop) has been requested *and* the queue has
    /// drained; jobs posted after the stop request but before the drain
    /// finishes still run. A panicking job is caught and logged so the loop
    /// keeps serving the remaining queue.
    pub fn run(&self) {
        assert!(
            self.running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "Scheduler::run() entered from two threads at once"
        );

        loop {
            let job = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(job) = queue.jobs.pop_front() {
                        break Some(job);
                    }
                    if queue.stop_requested {
                        break None;
                    }
                    self.cv.wait(&mut queue);
                }
            };

            let Some(job) = job else { break };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.execute())) {
                tracing::error!(
                    "scheduler job panicked: {}",
                    crate::task::panic_message(&payload)
                );
            }
        }

        self.running.store(false, Ordering::Release);
    }

    /// Request the run loop to exit once the queue drains. Idempotent,
    /// non-blocking, callable from any thread.
    pub fn stop(&self) {
        {
            let mut queue = self.queue.lock();
            queue.stop_requested = true;
        }
        self.cv.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Observational queue length.
    pub fn pending(&self) -> usize {
        self.queue.lock().jobs.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared, cloneable reference to a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct Handle(Arc<Scheduler>);

impl Handle {
    /// An awaitable that re-enqueues the current task behind everything
    /// already posted, forcing the code after the await to run on the
    /// scheduler thread.
    ///
    /// ```no_run
    /// # async fn doc(sched: spindle::scheduler::Handle) {
    /// sched.schedule().await;
    /// // now running from the scheduler's run loop
    /// # }
    /// ```
    pub fn schedule(&self) -> Schedule {
        Schedule {
            handle: self.clone(),
            queued: false,
        }
    }
}

impl Deref for Handle {
    type Target = Arc<Scheduler>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Future returned by [`Handle::schedule`].
#[derive(Debug)]
pub struct Schedule {
    handle: Handle,
    queued: bool,
}

impl Future for Schedule {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.queued {
            return Poll::Ready(());
        }

        self.queued = true;
        let waker = cx.waker().clone();
        self.handle.post(move || waker.wake());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SchedulerRunner;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_poster_fifo_order() {
        let handle = Scheduler::new().into_handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let order = order.clone();
            handle.post(move || order.lock().push(i));
        }

        handle.stop();
        handle.run();

        let order = order.lock();
        assert_eq!(*order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_posters_keep_per_thread_order() {
        let handle = Scheduler::new().into_handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let posters: Vec<_> = (0..4)
            .map(|tid| {
                let handle = handle.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let seen = seen.clone();
                        handle.post(move || seen.lock().push((tid, i)));
                    }
                })
            })
            .collect();
        for poster in posters {
            poster.join().unwrap();
        }

        handle.stop();
        handle.run();

        let seen = seen.lock();
        assert_eq!(seen.len(), 200);
        for tid in 0..4 {
            let per_thread: Vec<_> = seen.iter().filter(|(t, _)| *t == tid).collect();
            assert!(
                per_thread.windows(2).all(|w| w[0].1 < w[1].1),
                "posts from thread {tid} ran out of order"
            );
        }
    }

    #[test]
    fn test_pending_counts_queued_jobs() {
        let handle = Scheduler::new().into_handle();
        assert_eq!(handle.pending(), 0);
        handle.post(|| {});
        handle.post(|| {});
        assert_eq!(handle.pending(), 2);
    }

    #[test]
    fn test_stop_drains_before_run_returns() {
        let handle = Scheduler::new().into_handle();
        let (tx, rx) = mpsc::channel();

        // Stop first, then post: run() must still execute the job.
        handle.stop();
        handle.post(move || tx.send(42).unwrap());
        handle.run();

        assert_eq!(rx.try_recv().unwrap(), 42);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_is_running_observed_from_inside_a_job() {
        let handle = Scheduler::new().into_handle();
        let (tx, rx) = mpsc::channel();

        let probe = handle.clone();
        handle.post(move || tx.send(probe.is_running()).unwrap());
        handle.stop();
        handle.run();

        assert!(rx.try_recv().unwrap());
    }

    #[test]
    fn test_panicking_job_does_not_kill_the_loop() {
        let runner = SchedulerRunner::start();
        let (tx, rx) = mpsc::channel();

        runner.handle().post(|| panic!("job blew up"));
        runner.handle().post(move || tx.send(1).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_post_from_another_thread_wakes_the_loop() {
        let runner = SchedulerRunner::start();
        let (tx, rx) = mpsc::channel();

        let handle = runner.handle().clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.post(move || tx.send("late").unwrap());
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
    }
}
