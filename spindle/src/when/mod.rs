//! Structured concurrency combinators over heterogeneous tasks.
//!
//! [`when_all`] and [`when_any`] accept a tuple of [`Task`]s, start every
//! child concurrently on the given scheduler, and return a new `Task`
//! aggregating the outcome. Each child runs as a detached runner that
//! writes its typed result slot and then participates in exactly one
//! completion protocol: an acq_rel decrement of the remaining-count for
//! `when_all`, or a single compare-and-swap of the done flag for
//! `when_any`. These are the only atomics the combinators rely on.
//!
//! The shared state is jointly owned by the parent and the runners; the
//! last owner frees it.

use crate::scheduler::Handle;
use crate::task::Task;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

type PanicPayload = Box<dyn Any + Send + 'static>;

const NO_WINNER: usize = usize::MAX;

/// Wait for every task in the tuple; the result tuple maps positionally
/// onto the inputs.
///
/// All children are started on `scheduler` before the returned task first
/// suspends. If one or more children panic, the aggregate completes only
/// after *all* children have finished and then resumes the first captured
/// panic; later ones are dropped.
///
/// ```no_run
/// use spindle::task::Task;
/// use spindle::when::when_all;
///
/// # async fn doc(sched: spindle::scheduler::Handle) {
/// let (a, b) = when_all(
///     &sched,
///     (Task::new(async { 10 }), Task::new(async { 20 })),
/// )
/// .await;
/// assert_eq!((a, b), (10, 20));
/// # }
/// ```
pub fn when_all<L>(scheduler: &Handle, tasks: L) -> Task<L::Output>
where
    L: WhenAllList,
{
    let scheduler = scheduler.clone();
    Task::new(async move {
        let state = Arc::new(WhenAllState::new(L::LEN));
        let slots = tasks.launch(&scheduler, &state);
        JoinAll { state }.await;
        L::take(slots)
    })
}

/// Wait for the first task in the tuple to finish.
///
/// Resolves to `(winning_index, slots)` where only the winner's `Option`
/// slot is populated. The winner is decided by a single CAS; losers keep
/// running to completion and their results are discarded. If the winner
/// panicked, the panic is resumed on await; losers' panics are dropped.
///
/// ```no_run
/// use spindle::task::Task;
/// use spindle::when::when_any;
///
/// # async fn doc(sched: spindle::scheduler::Handle) {
/// let (index, (first, _second)) = when_any(
///     &sched,
///     (Task::new(async { 7 }), Task::new(std::future::pending::<i32>())),
/// )
/// .await;
/// assert_eq!(index, 0);
/// assert_eq!(first, Some(7));
/// # }
/// ```
pub fn when_any<L>(scheduler: &Handle, tasks: L) -> Task<(usize, L::Output)>
where
    L: WhenAnyList,
{
    let scheduler = scheduler.clone();
    Task::new(async move {
        let state = Arc::new(WhenAnyState::new());
        let slots = tasks.launch(&scheduler, &state);
        let index = JoinAny { state }.await;
        (index, L::take(slots))
    })
}

/// Tuple sugar: `when_all!(sched, a, b, c)` is
/// `when_all(&sched, (a, b, c))`.
#[macro_export]
macro_rules! when_all {
    ($scheduler:expr, $($task:expr),+ $(,)?) => {
        $crate::when::when_all(&$scheduler, ($($task,)+))
    };
}

/// Tuple sugar: `when_any!(sched, a, b, c)` is
/// `when_any(&sched, (a, b, c))`.
#[macro_export]
macro_rules! when_any {
    ($scheduler:expr, $($task:expr),+ $(,)?) => {
        $crate::when::when_any(&$scheduler, ($($task,)+))
    };
}

/// Typed result slot shared between one runner and the parent.
pub struct Slot<T>(Mutex<Option<T>>);

impl<T> Slot<T> {
    fn new() -> Self {
        Self(Mutex::new(None))
    }

    fn put(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    fn take(&self) -> T {
        self.0.lock().take().expect("result slot is empty")
    }

    fn take_opt(&self) -> Option<T> {
        self.0.lock().take()
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").finish_non_exhaustive()
    }
}

/// Shared completion state for [`when_all`].
pub struct WhenAllState {
    remaining: AtomicUsize,
    first_panic: Mutex<Option<PanicPayload>>,
    parent: Mutex<Option<Waker>>,
}

impl WhenAllState {
    fn new(children: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(children),
            first_panic: Mutex::new(None),
            parent: Mutex::new(None),
        }
    }

    fn store_panic(&self, payload: PanicPayload) {
        let mut slot = self.first_panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    /// Decrement the remaining-count; the last child wakes the parent.
    fn child_done(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(waker) = self.parent.lock().take() {
                waker.wake();
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}

impl fmt::Debug for WhenAllState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenAllState")
            .field("remaining", &self.remaining.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct JoinAll {
    state: Arc<WhenAllState>,
}

impl Future for JoinAll {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Register before checking, so a child finishing in between still
        // finds a waker to fire.
        *self.state.parent.lock() = Some(cx.waker().clone());

        if self.state.is_complete() {
            if let Some(payload) = self.state.first_panic.lock().take() {
                panic::resume_unwind(payload);
            }
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Shared completion state for [`when_any`].
pub struct WhenAnyState {
    done: AtomicBool,
    winner: AtomicUsize,
    panic: Mutex<Option<PanicPayload>>,
    parent: Mutex<Option<Waker>>,
}

impl WhenAnyState {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            winner: AtomicUsize::new(NO_WINNER),
            panic: Mutex::new(None),
            parent: Mutex::new(None),
        }
    }

    /// One CAS decides the winner; losers get `false`.
    fn try_win(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Winner-only: record the index (after the slot write, so the parent
    /// observing the index also observes the result) and wake the parent.
    fn publish(&self, index: usize) {
        self.winner.store(index, Ordering::Release);
        if let Some(waker) = self.parent.lock().take() {
            waker.wake();
        }
    }

    fn winner(&self) -> Option<usize> {
        match self.winner.load(Ordering::Acquire) {
            NO_WINNER => None,
            index => Some(index),
        }
    }
}

impl fmt::Debug for WhenAnyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenAnyState")
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct JoinAny {
    state: Arc<WhenAnyState>,
}

impl Future for JoinAny {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        *self.state.parent.lock() = Some(cx.waker().clone());

        match self.state.winner() {
            Some(index) => {
                if let Some(payload) = self.state.panic.lock().take() {
                    panic::resume_unwind(payload);
                }
                Poll::Ready(index)
            }
            None => Poll::Pending,
        }
    }
}

fn launch_all_child<T>(scheduler: &Handle, state: &Arc<WhenAllState>, task: Task<T>) -> Arc<Slot<T>>
where
    T: Send + 'static,
{
    let slot = Arc::new(Slot::new());
    let out = slot.clone();
    let state = state.clone();

    Task::new(async move {
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(value) => out.put(value),
            Err(payload) => state.store_panic(payload),
        }
        state.child_done();
    })
    .start(scheduler)
    .detach();

    slot
}

fn launch_any_child<T>(
    scheduler: &Handle,
    state: &Arc<WhenAnyState>,
    index: usize,
    task: Task<T>,
) -> Arc<Slot<T>>
where
    T: Send + 'static,
{
    let slot = Arc::new(Slot::new());
    let out = slot.clone();
    let state = state.clone();

    Task::new(async move {
        let result = AssertUnwindSafe(task).catch_unwind().await;
        if state.try_win() {
            match result {
                Ok(value) => out.put(value),
                Err(payload) => *state.panic.lock() = Some(payload),
            }
            state.publish(index);
        }
        // Losers drop their result, panics included.
    })
    .start(scheduler)
    .detach();

    slot
}

/// Tuples of tasks accepted by [`when_all`]. Implemented for arities 0
/// through 8.
pub trait WhenAllList: Send + 'static {
    type Slots: Send;
    type Output: Send + 'static;
    const LEN: usize;

    fn launch(self, scheduler: &Handle, state: &Arc<WhenAllState>) -> Self::Slots;
    fn take(slots: Self::Slots) -> Self::Output;
}

/// Tuples of tasks accepted by [`when_any`]. Implemented for arities 1
/// through 8.
pub trait WhenAnyList: Send + 'static {
    type Slots: Send;
    type Output: Send + 'static;
    const LEN: usize;

    fn launch(self, scheduler: &Handle, state: &Arc<WhenAnyState>) -> Self::Slots;
    fn take(slots: Self::Slots) -> Self::Output;
}

impl WhenAllList for () {
    type Slots = ();
    type Output = ();
    const LEN: usize = 0;

    fn launch(self, _scheduler: &Handle, _state: &Arc<WhenAllState>) -> Self::Slots {}

    fn take(_slots: Self::Slots) -> Self::Output {}
}

macro_rules! impl_when_list {
    ( $( $len:literal => ( $( $ty:ident . $idx:tt ),+ ); )+ ) => {
        $(
            impl<$($ty: Send + 'static),+> WhenAllList for ($(Task<$ty>,)+) {
                type Slots = ($(Arc<Slot<$ty>>,)+);
                type Output = ($($ty,)+);
                const LEN: usize = $len;

                fn launch(self, scheduler: &Handle, state: &Arc<WhenAllState>) -> Self::Slots {
                    ($(launch_all_child(scheduler, state, self.$idx),)+)
                }

                fn take(slots: Self::Slots) -> Self::Output {
                    ($(slots.$idx.take(),)+)
                }
            }

            impl<$($ty: Send + 'static),+> WhenAnyList for ($(Task<$ty>,)+) {
                type Slots = ($(Arc<Slot<$ty>>,)+);
                type Output = ($(Option<$ty>,)+);
                const LEN: usize = $len;

                fn launch(self, scheduler: &Handle, state: &Arc<WhenAnyState>) -> Self::Slots {
                    ($(launch_any_child(scheduler, state, $idx, self.$idx),)+)
                }

                fn take(slots: Self::Slots) -> Self::Output {
                    ($(slots.$idx.take_opt(),)+)
                }
            }
        )+
    };
}

impl_when_list! {
    1 => (T0.0);
    2 => (T0.0, T1.1);
    3 => (T0.0, T1.1, T2.2);
    4 => (T0.0, T1.1, T2.2, T3.3);
    5 => (T0.0, T1.1, T2.2, T3.3, T4.4);
    6 => (T0.0, T1.1, T2.2, T3.3, T4.4, T5.5);
    7 => (T0.0, T1.1, T2.2, T3.3, T4.4, T5.5, T6.6);
    8 => (T0.0, T1.1, T2.2, T3.3, T4.4, T5.5, T6.6, T7.7);
}
