//! POSIX signal subscription with coroutine-friendly delivery.
//!
//! A dedicated worker blocks the subscribed set and waits with `sigwait`.
//! Each delivery is handed to the scheduler as a dispatch step, which runs
//! the user callback and either wakes the registered waiter or buffers the
//! signal number for the next one. The worker is poked with a private wake
//! signal (`SIGURG`, ignored by default) whenever the subscription set
//! changes or the set is stopped.
//!
//! Only the worker thread blocks the subscribed signals; embedders that
//! need process-wide capture should mask them on their own threads too.
//!
//! On non-POSIX platforms every operation fails with `not_supported`.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::runtime::RuntimeConfig;
use crate::scheduler;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

#[cfg(unix)]
use nix::sys::pthread::{Pthread, pthread_kill, pthread_self};
#[cfg(unix)]
use nix::sys::signal::{SigSet, SigmaskHow, Signal, pthread_sigmask};

/// Private wakeup for the sigwait worker. SIGURG is ignored by default, so
/// a stray delivery to a thread that does not block it is harmless.
#[cfg(unix)]
const WAKE_SIGNAL: Signal = Signal::SIGURG;

#[derive(Default)]
struct WaitState {
    delivered: Option<i32>,
    waker: Option<Waker>,
}

#[derive(Default)]
struct WaitShared {
    state: Mutex<WaitState>,
}

struct SignalState {
    signals: Vec<i32>,
    pending: VecDeque<i32>,
    waiter: Option<Arc<WaitShared>>,
    callback: Option<Arc<dyn Fn(i32) + Send + Sync>>,
    started: bool,
    stopped: bool,
    worker: Option<thread::JoinHandle<()>>,
    #[cfg(unix)]
    worker_thread: Option<Pthread>,
}

struct SignalInner {
    scheduler: scheduler::Handle,
    cfg: RuntimeConfig,
    state: Mutex<SignalState>,
}

/// A set of subscribed POSIX signals with at most one asynchronous waiter.
///
/// Owned by the runtime (see
/// [`Runtime::signals`](crate::runtime::Runtime::signals)). Deliveries that
/// arrive while nobody waits are buffered in FIFO order and handed out on
/// the next [`async_wait`](SignalSet::async_wait) or
/// [`try_next`](SignalSet::try_next).
pub struct SignalSet {
    inner: Arc<SignalInner>,
}

impl SignalSet {
    pub(crate) fn new(scheduler: scheduler::Handle, cfg: &RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                scheduler,
                cfg: cfg.clone(),
                state: Mutex::new(SignalState {
                    signals: Vec::new(),
                    pending: VecDeque::new(),
                    waiter: None,
                    callback: None,
                    started: false,
                    stopped: false,
                    worker: None,
                    #[cfg(unix)]
                    worker_thread: None,
                }),
            }),
        }
    }

    /// Subscribe to `signum`. Unknown signal numbers fail with
    /// `invalid_argument`.
    pub fn add(&self, signum: i32) -> Result<(), Error> {
        self.validate(signum)?;
        {
            let mut state = self.inner.state.lock();
            if !state.signals.contains(&signum) {
                state.signals.push(signum);
            }
        }
        self.kick_worker();
        Ok(())
    }

    /// Unsubscribe from `signum`.
    pub fn remove(&self, signum: i32) -> Result<(), Error> {
        self.validate(signum)?;
        {
            let mut state = self.inner.state.lock();
            state.signals.retain(|s| *s != signum);
        }
        self.kick_worker();
        Ok(())
    }

    /// Register a callback invoked on the scheduler thread for every
    /// delivery, in addition to waking any waiter.
    pub fn on_signal<F>(&self, f: F)
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.inner.state.lock().callback = Some(Arc::new(f));
    }

    /// Suspend until one of the subscribed signals is delivered and return
    /// its number.
    ///
    /// At most one waiter may be registered at a time; a second concurrent
    /// wait fails with `rejected`. Cancellation is observed when the waiter
    /// resumes and fails with `canceled`; an already-delivered number is
    /// put back into the buffer, not lost. On non-POSIX platforms the wait
    /// fails with `not_supported`.
    pub fn async_wait(&self, token: CancelToken) -> SignalWait {
        SignalWait {
            inner: self.inner.clone(),
            token,
            stage: WaitStage::Init,
        }
    }

    /// Pop a buffered signal number without waiting; `not_ready` when the
    /// buffer is empty.
    pub fn try_next(&self) -> Result<i32, Error> {
        self.inner
            .state
            .lock()
            .pending
            .pop_front()
            .ok_or_else(Error::not_ready)
    }

    /// Wake the worker and let it exit. Idempotent and non-blocking.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
        }
        self.kick_worker();
    }

    #[cfg(unix)]
    fn validate(&self, signum: i32) -> Result<(), Error> {
        Signal::try_from(signum).map_err(|_| Error::invalid_argument())?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn validate(&self, _signum: i32) -> Result<(), Error> {
        Err(Error::not_supported())
    }

    #[cfg(unix)]
    fn kick_worker(&self) {
        let tid = self.inner.state.lock().worker_thread;
        if let Some(tid) = tid {
            let _ = pthread_kill(tid, WAKE_SIGNAL);
        }
    }

    #[cfg(not(unix))]
    fn kick_worker(&self) {}

    #[cfg(all(test, unix))]
    pub(crate) fn worker_thread(&self) -> Option<Pthread> {
        self.inner.state.lock().worker_thread
    }
}

impl Drop for SignalSet {
    fn drop(&mut self) {
        self.stop();
        let worker = self.inner.state.lock().worker.take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SignalSet")
            .field("signals", &state.signals)
            .field("buffered", &state.pending.len())
            .finish_non_exhaustive()
    }
}

/// Spawn the sigwait worker on first use. Caller holds the state lock.
#[cfg(unix)]
fn start_worker(inner: &Arc<SignalInner>, state: &mut SignalState) {
    if state.started {
        return;
    }
    state.started = true;

    let worker_inner = inner.clone();
    let worker = inner
        .cfg
        .thread_builder("signal")
        .spawn(move || worker_loop(&worker_inner))
        .expect("failed to spawn signal worker thread");
    state.worker = Some(worker);
}

#[cfg(unix)]
fn worker_loop(inner: &Arc<SignalInner>) {
    loop {
        let subscribed = {
            let state = inner.state.lock();
            if state.stopped {
                return;
            }
            state.signals.clone()
        };

        let mut set = SigSet::empty();
        set.add(WAKE_SIGNAL);
        for signum in &subscribed {
            if let Ok(signal) = Signal::try_from(*signum) {
                set.add(signal);
            }
        }

        if let Err(err) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&set), None) {
            tracing::warn!("signal worker failed to update its mask: {err}");
            return;
        }

        // Publish our pthread only after the mask is in place, so a
        // directed signal can never hit this thread unblocked.
        {
            let mut state = inner.state.lock();
            if state.stopped {
                return;
            }
            if state.worker_thread.is_none() {
                state.worker_thread = Some(pthread_self());
            }
        }

        let received = match set.wait() {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!("sigwait failed: {err}");
                thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
        };

        if received == WAKE_SIGNAL {
            // Subscription change or stop request; re-read state.
            continue;
        }

        let number = received as i32;
        {
            let mut state = inner.state.lock();
            if state.stopped {
                return;
            }
            // A delivery can race with remove(); drop it in that case.
            if !state.signals.contains(&number) {
                continue;
            }
            state.pending.push_back(number);
        }

        post_dispatch(inner);
    }
}

/// Hand one buffered delivery to the scheduler thread: run the callback,
/// then wake the waiter or put the number back into the buffer.
#[cfg(unix)]
fn post_dispatch(inner: &Arc<SignalInner>) {
    let scheduler = inner.scheduler.clone();
    let inner = inner.clone();
    scheduler.post(move || {
        let (number, callback, waiter) = {
            let mut state = inner.state.lock();
            let Some(number) = state.pending.pop_front() else {
                return;
            };
            (number, state.callback.clone(), state.waiter.take())
        };

        if let Some(callback) = callback {
            callback(number);
        }

        match waiter {
            Some(shared) => {
                let waker = {
                    let mut wait = shared.state.lock();
                    wait.delivered = Some(number);
                    wait.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            None => inner.state.lock().pending.push_front(number),
        }
    });
}

enum WaitStage {
    Init,
    Registered(Arc<WaitShared>),
    Done,
}

/// Future returned by [`SignalSet::async_wait`].
pub struct SignalWait {
    inner: Arc<SignalInner>,
    token: CancelToken,
    stage: WaitStage,
}

impl Future for SignalWait {
    type Output = Result<i32, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        #[cfg(not(unix))]
        {
            let _ = cx;
            self.stage = WaitStage::Done;
            return Poll::Ready(Err(Error::not_supported()));
        }

        #[cfg(unix)]
        {
            let this = &mut *self;
            let stage = std::mem::replace(&mut this.stage, WaitStage::Done);

            match stage {
                WaitStage::Init => {
                    let mut state = this.inner.state.lock();

                    if this.token.is_cancelled() {
                        return Poll::Ready(Err(Error::canceled()));
                    }
                    if state.stopped {
                        return Poll::Ready(Err(Error::stopped()));
                    }
                    if let Some(number) = state.pending.pop_front() {
                        return Poll::Ready(Ok(number));
                    }
                    if state.waiter.is_some() {
                        // One waiter at a time.
                        return Poll::Ready(Err(Error::rejected()));
                    }

                    let shared = Arc::new(WaitShared::default());
                    shared.state.lock().waker = Some(cx.waker().clone());
                    state.waiter = Some(shared.clone());
                    start_worker(&this.inner, &mut state);
                    drop(state);

                    this.stage = WaitStage::Registered(shared);
                    return Poll::Pending;
                }
                WaitStage::Registered(shared) => {
                    let delivered = {
                        let mut wait = shared.state.lock();
                        match wait.delivered.take() {
                            Some(number) => Some(number),
                            None => {
                                wait.waker = Some(cx.waker().clone());
                                None
                            }
                        }
                    };

                    match delivered {
                        Some(number) => {
                            if this.token.is_cancelled() {
                                // Fail the wait but keep the signal.
                                this.inner.state.lock().pending.push_front(number);
                                return Poll::Ready(Err(Error::canceled()));
                            }
                            return Poll::Ready(Ok(number));
                        }
                        None if this.token.is_cancelled() => {
                            let mut state = this.inner.state.lock();
                            if state
                                .waiter
                                .as_ref()
                                .is_some_and(|w| Arc::ptr_eq(w, &shared))
                            {
                                state.waiter = None;
                            }
                            return Poll::Ready(Err(Error::canceled()));
                        }
                        None => {
                            this.stage = WaitStage::Registered(shared);
                            return Poll::Pending;
                        }
                    }
                }
                WaitStage::Done => panic!("SignalWait polled after completion"),
            }
        }
    }
}

impl Drop for SignalWait {
    fn drop(&mut self) {
        if let WaitStage::Registered(shared) = &self.stage {
            let mut state = self.inner.state.lock();
            if state
                .waiter
                .as_ref()
                .is_some_and(|w| Arc::ptr_eq(w, shared))
            {
                state.waiter = None;
            }
        }
    }
}

impl fmt::Debug for SignalWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWait").finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::error::ErrorKind;
    use crate::test_utils::{SchedulerRunner, test_config};
    use futures::task::noop_waker_ref;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn signals_with_runner() -> (SignalSet, SchedulerRunner) {
        let runner = SchedulerRunner::start();
        let signals = SignalSet::new(runner.handle().clone(), &test_config());
        (signals, runner)
    }

    fn wait_for_worker(signals: &SignalSet) -> Pthread {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(tid) = signals.worker_thread() {
                return tid;
            }
            assert!(Instant::now() < deadline, "signal worker never started");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_unknown_signal_number_is_invalid() {
        let (signals, _runner) = signals_with_runner();
        assert_eq!(
            signals.add(-1).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            signals.remove(12345).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_try_next_on_empty_buffer_is_not_ready() {
        let (signals, _runner) = signals_with_runner();
        assert_eq!(signals.try_next().unwrap_err().kind(), ErrorKind::NotReady);
    }

    #[test]
    fn test_precancelled_wait_fails_immediately() {
        let (signals, _runner) = signals_with_runner();
        let source = CancelSource::new();
        source.request_cancel();

        let result = futures::executor::block_on(signals.async_wait(source.token()));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Canceled);
    }

    #[test]
    fn test_second_concurrent_waiter_is_rejected() {
        let (signals, _runner) = signals_with_runner();
        signals.add(libc::SIGUSR2).unwrap();

        let mut first = signals.async_wait(CancelToken::default());
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(Pin::new(&mut first).poll(&mut cx).is_pending());

        let second = futures::executor::block_on(signals.async_wait(CancelToken::default()));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Rejected);
    }

    #[test]
    fn test_dropping_a_waiter_frees_the_slot() {
        let (signals, _runner) = signals_with_runner();
        signals.add(libc::SIGUSR2).unwrap();

        let mut first = signals.async_wait(CancelToken::default());
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(Pin::new(&mut first).poll(&mut cx).is_pending());
        drop(first);

        let mut second = signals.async_wait(CancelToken::default());
        assert!(Pin::new(&mut second).poll(&mut cx).is_pending());
    }

    #[test]
    fn test_delivery_wakes_the_waiter_and_runs_the_callback() {
        let (signals, _runner) = signals_with_runner();
        signals.add(libc::SIGUSR1).unwrap();

        let (cb_tx, cb_rx) = mpsc::channel();
        signals.on_signal(move |number| cb_tx.send(number).unwrap());

        let wait = signals.async_wait(CancelToken::default());

        // The worker starts on first poll; deliver once it has published
        // its pthread (which implies the mask is in place).
        let inner = signals.inner.clone();
        let killer = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let tid = loop {
                if let Some(tid) = inner.state.lock().worker_thread {
                    break tid;
                }
                assert!(Instant::now() < deadline, "signal worker never started");
                thread::sleep(Duration::from_millis(1));
            };
            pthread_kill(tid, Signal::SIGUSR1).unwrap();
        });

        let number = futures::executor::block_on(wait).unwrap();
        killer.join().unwrap();

        assert_eq!(number, libc::SIGUSR1);
        assert_eq!(
            cb_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            libc::SIGUSR1
        );
    }

    #[test]
    fn test_unclaimed_delivery_is_buffered_for_try_next() {
        let (signals, _runner) = signals_with_runner();
        signals.add(libc::SIGUSR1).unwrap();

        // Start and immediately drop a waiter so the worker is running but
        // nobody is registered.
        let mut wait = signals.async_wait(CancelToken::default());
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        drop(wait);

        let tid = wait_for_worker(&signals);
        pthread_kill(tid, Signal::SIGUSR1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match signals.try_next() {
                Ok(number) => {
                    assert_eq!(number, libc::SIGUSR1);
                    break;
                }
                Err(_) => {
                    assert!(Instant::now() < deadline, "delivery never buffered");
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}
