use crate::cancel::CancelToken;
use crate::error::Error;
use crate::time::TimerInner;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

#[derive(Default)]
struct SleepShared {
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

/// Future returned by [`Timer::sleep_for`](crate::time::Timer::sleep_for).
///
/// Registers its timer entry on first poll, so the deadline is measured
/// from when the sleep is first awaited, not when it is created.
pub struct Sleep {
    timer: Arc<TimerInner>,
    duration: Duration,
    token: CancelToken,
    shared: Arc<SleepShared>,
    registered: bool,
}

impl Sleep {
    pub(crate) fn new(timer: Arc<TimerInner>, duration: Duration, token: CancelToken) -> Self {
        Self {
            timer,
            duration,
            token,
            shared: Arc::new(SleepShared::default()),
            registered: false,
        }
    }

    fn finish(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            Err(Error::canceled())
        } else {
            Ok(())
        }
    }
}

impl Future for Sleep {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.registered {
            if self.duration.is_zero() {
                return Poll::Ready(self.finish());
            }

            self.registered = true;
            *self.shared.waker.lock() = Some(cx.waker().clone());

            // The entry carries an inert token: the wakeup itself is never
            // suppressed, cancellation is reported at resume instead.
            let shared = self.shared.clone();
            let scheduled = self.timer.schedule(
                Instant::now() + self.duration,
                Box::new(move || {
                    shared.fired.store(true, Ordering::Release);
                    if let Some(waker) = shared.waker.lock().take() {
                        waker.wake();
                    }
                }),
                CancelToken::default(),
            );

            if !scheduled {
                return Poll::Ready(Err(Error::stopped()));
            }
            return Poll::Pending;
        }

        if self.shared.fired.load(Ordering::Acquire) {
            return Poll::Ready(self.finish());
        }

        *self.shared.waker.lock() = Some(cx.waker().clone());
        if self.shared.fired.load(Ordering::Acquire) {
            return Poll::Ready(self.finish());
        }
        Poll::Pending
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("duration", &self.duration)
            .field("registered", &self.registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::error::ErrorKind;
    use crate::test_utils::{SchedulerRunner, test_config};
    use crate::time::Timer;
    use rstest::rstest;

    fn timer_with_runner() -> (Timer, SchedulerRunner) {
        let runner = SchedulerRunner::start();
        let timer = Timer::new(runner.handle().clone(), &test_config());
        (timer, runner)
    }

    #[rstest]
    #[case::ten_millis(Duration::from_millis(10))]
    #[case::thirty_millis(Duration::from_millis(30))]
    #[case::eighty_millis(Duration::from_millis(80))]
    fn test_sleep_never_resumes_early(#[case] duration: Duration) {
        let (timer, _runner) = timer_with_runner();

        let start = Instant::now();
        let result = futures::executor::block_on(timer.sleep_for(duration, CancelToken::default()));
        let elapsed = start.elapsed();

        assert!(result.is_ok());
        // The sleep must last *at least* the requested duration. Scheduler
        // latency can stretch it, so only a coarse upper sanity bound.
        assert!(
            elapsed >= duration,
            "sleep resumed early: {elapsed:?} < {duration:?}"
        );
        assert!(elapsed < duration + Duration::from_secs(2));
    }

    #[test]
    fn test_zero_duration_is_ready_immediately() {
        let (timer, _runner) = timer_with_runner();
        let result =
            futures::executor::block_on(timer.sleep_for(Duration::ZERO, CancelToken::default()));
        assert!(result.is_ok());
    }

    #[test]
    fn test_zero_duration_still_honors_cancellation() {
        let (timer, _runner) = timer_with_runner();
        let source = CancelSource::new();
        source.request_cancel();

        let result =
            futures::executor::block_on(timer.sleep_for(Duration::ZERO, source.token()));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Canceled);
    }

    #[test]
    fn test_cancelled_sleep_fails_at_resume() {
        let (timer, _runner) = timer_with_runner();
        let source = CancelSource::new();
        source.request_cancel();

        let start = Instant::now();
        let result = futures::executor::block_on(
            timer.sleep_for(Duration::from_millis(20), source.token()),
        );

        // The wakeup still happens at the deadline; cancellation surfaces
        // on resume.
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Canceled);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_on_a_stopped_timer_fails_fast() {
        let (timer, _runner) = timer_with_runner();
        timer.stop();

        let result = futures::executor::block_on(
            timer.sleep_for(Duration::from_millis(10), CancelToken::default()),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Stopped);
    }
}
