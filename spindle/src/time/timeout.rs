use crate::error::Error;
use crate::time::Sleep;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`Timer::timeout`](crate::time::Timer::timeout).
///
/// Resolves to the inner future's output, or to `Err(timeout)` once the
/// deadline elapses. The inner future is polled first, so a result that is
/// ready at the deadline wins the race.
#[pin_project]
#[derive(Debug)]
pub struct Timeout<F> {
    #[pin]
    future: F,
    sleep: Sleep,
}

impl<F> Timeout<F> {
    pub(crate) fn new(future: F, sleep: Sleep) -> Self {
        Self { future, sleep }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(value) = this.future.poll(cx) {
            return Poll::Ready(Ok(value));
        }

        match Pin::new(this.sleep).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Err(Error::timeout())),
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::error::ErrorKind;
    use crate::test_utils::{SchedulerRunner, test_config};
    use crate::time::Timer;
    use std::time::Duration;

    fn timer_with_runner() -> (Timer, SchedulerRunner) {
        let runner = SchedulerRunner::start();
        let timer = Timer::new(runner.handle().clone(), &test_config());
        (timer, runner)
    }

    #[test]
    fn test_inner_future_wins_when_fast() {
        let (timer, _runner) = timer_with_runner();

        let fast = timer.sleep_for(Duration::from_millis(10), CancelToken::default());
        let result =
            futures::executor::block_on(timer.timeout(Duration::from_millis(500), fast));
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn test_deadline_wins_when_inner_is_slow() {
        let (timer, _runner) = timer_with_runner();

        let slow = timer.sleep_for(Duration::from_millis(500), CancelToken::default());
        let result = futures::executor::block_on(timer.timeout(Duration::from_millis(20), slow));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_ready_future_beats_a_zero_deadline() {
        let (timer, _runner) = timer_with_runner();

        let result =
            futures::executor::block_on(timer.timeout(Duration::ZERO, std::future::ready(7)));
        assert_eq!(result.unwrap(), 7);
    }
}
