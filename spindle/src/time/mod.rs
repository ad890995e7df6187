//! Deadline-ordered timers backed by one worker thread.
//!
//! Entries are totally ordered by `(deadline, sequence)`; the sequence
//! number breaks ties in submission order. The worker sleeps until the
//! earliest deadline or until the queue changes, and fires expired entries
//! by posting their jobs onto the scheduler.

mod sleep;
mod timeout;

pub use sleep::Sleep;
pub use timeout::Timeout;

use crate::cancel::CancelToken;
use crate::runtime::RuntimeConfig;
use crate::scheduler::{self, Job};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type TimerJob = Box<dyn FnOnce() + Send>;

struct Entry {
    token: CancelToken,
    job: TimerJob,
}

struct TimerState {
    entries: BTreeMap<(Instant, u64), Entry>,
    next_seq: u64,
    stopped: bool,
}

pub(crate) struct TimerInner {
    scheduler: scheduler::Handle,
    state: Mutex<TimerState>,
    cv: Condvar,
}

impl TimerInner {
    /// Insert an entry, returning false once the timer is stopped.
    pub(crate) fn schedule(&self, deadline: Instant, job: TimerJob, token: CancelToken) -> bool {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.next_seq += 1;
            let seq = state.next_seq;
            state.entries.insert((deadline, seq), Entry { token, job });
        }
        self.cv.notify_all();
        true
    }
}

/// The timer service.
///
/// Owned by the runtime (see
/// [`Runtime::timer`](crate::runtime::Runtime::timer)) and shared as an
/// `Arc`. [`stop`](Timer::stop) drops every pending entry and ends the
/// worker; dropping the last reference joins it.
pub struct Timer {
    inner: Arc<TimerInner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timer {
    pub(crate) fn new(scheduler: scheduler::Handle, cfg: &RuntimeConfig) -> Self {
        let inner = Arc::new(TimerInner {
            scheduler,
            state: Mutex::new(TimerState {
                entries: BTreeMap::new(),
                next_seq: 0,
                stopped: false,
            }),
            cv: Condvar::new(),
        });

        let worker_inner = inner.clone();
        let worker = cfg
            .thread_builder("timer")
            .spawn(move || timer_loop(&worker_inner))
            .expect("failed to spawn timer worker thread");

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Fire-and-forget: post `f` onto the scheduler once `delay` elapses.
    ///
    /// If `token` is cancelled by the time the deadline arrives, the job is
    /// suppressed and nothing is posted.
    pub fn after<F>(&self, delay: Duration, f: F, token: CancelToken)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .schedule(Instant::now() + delay, Box::new(f), token);
    }

    /// Sleep for `duration`, measured on the monotonic clock.
    ///
    /// The returned future resolves no earlier than `duration` from its
    /// first poll. `token` is observed when the sleeper resumes: a sleep
    /// whose token was cancelled mid-wait still wakes at the deadline and
    /// then fails with `canceled`. A zero duration is ready immediately
    /// without suspending, and still honors cancellation.
    pub fn sleep_for(&self, duration: Duration, token: CancelToken) -> Sleep {
        Sleep::new(self.inner.clone(), duration, token)
    }

    /// Race `future` against a deadline; `Err(timeout)` once it expires.
    pub fn timeout<F>(&self, duration: Duration, future: F) -> Timeout<F>
    where
        F: Future,
    {
        Timeout::new(future, self.sleep_for(duration, CancelToken::default()))
    }

    /// Observational count of pending entries.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Drop all pending entries and end the worker. Idempotent and
    /// non-blocking. Sleeps already registered never resume after this.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            state.entries.clear();
        }
        self.inner.cv.notify_all();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

fn timer_loop(inner: &TimerInner) {
    loop {
        let fired = {
            let mut state = inner.state.lock();
            loop {
                if state.stopped {
                    return;
                }

                let Some((&key, _)) = state.entries.first_key_value() else {
                    inner.cv.wait(&mut state);
                    continue;
                };

                if Instant::now() < key.0 {
                    // Re-peek after every wakeup: a newer, earlier entry
                    // may have been inserted while we slept.
                    let _ = inner.cv.wait_until(&mut state, key.0);
                    continue;
                }

                break state.entries.remove(&key).expect("expired entry vanished");
            }
        };

        // Cancellation observed at firing time suppresses the job.
        if !fired.token.is_cancelled() {
            inner.scheduler.post_job(Job::Run(fired.job));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::test_utils::{SchedulerRunner, test_config};
    use std::sync::mpsc;

    fn timer_with_runner() -> (Timer, SchedulerRunner) {
        let runner = SchedulerRunner::start();
        let timer = Timer::new(runner.handle().clone(), &test_config());
        (timer, runner)
    }

    #[test]
    fn test_after_fires_on_the_scheduler() {
        let (timer, _runner) = timer_with_runner();
        let (tx, rx) = mpsc::channel();

        let start = Instant::now();
        timer.after(
            Duration::from_millis(20),
            move || tx.send(Instant::now()).unwrap(),
            CancelToken::default(),
        );

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(start) >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancelled_entry_is_suppressed() {
        let (timer, _runner) = timer_with_runner();
        let (tx, rx) = mpsc::channel::<()>();
        let source = CancelSource::new();

        timer.after(
            Duration::from_millis(10),
            move || tx.send(()).unwrap(),
            source.token(),
        );
        source.request_cancel();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_ties_fire_in_submission_order() {
        let (timer, _runner) = timer_with_runner();
        let (tx, rx) = mpsc::channel();
        let deadline = Duration::from_millis(30);

        for i in 0..5 {
            let tx = tx.clone();
            timer.after(deadline, move || tx.send(i).unwrap(), CancelToken::default());
        }

        let fired: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_earlier_entry_preempts_the_current_wait() {
        let (timer, _runner) = timer_with_runner();
        let (tx, rx) = mpsc::channel();

        let slow_tx = tx.clone();
        timer.after(
            Duration::from_millis(150),
            move || slow_tx.send("slow").unwrap(),
            CancelToken::default(),
        );
        timer.after(
            Duration::from_millis(10),
            move || tx.send("fast").unwrap(),
            CancelToken::default(),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fast");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "slow");
    }

    #[test]
    fn test_stop_drops_pending_entries() {
        let (timer, _runner) = timer_with_runner();
        let (tx, rx) = mpsc::channel::<()>();

        timer.after(
            Duration::from_millis(50),
            move || tx.send(()).unwrap(),
            CancelToken::default(),
        );
        timer.stop();

        assert_eq!(timer.pending(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
