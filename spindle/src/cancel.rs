//! Cooperative cancellation primitives.
//!
//! A [`CancelSource`] owns a shared flag; any number of [`CancelToken`]s
//! observe it. Cancellation is monotonic: once requested it can never be
//! withdrawn. Awaitables that accept a token check it at their documented
//! suspension points and fail with [`ErrorKind::Canceled`]; nothing is ever
//! interrupted mid-execution.
//!
//! [`ErrorKind::Canceled`]: crate::error::ErrorKind::Canceled

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The shared flag behind a source and its tokens.
///
/// Lives as long as any source or token still references it.
#[derive(Debug, Default)]
pub struct CancelState {
    cancelled: AtomicBool,
}

impl CancelState {
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// An observer of a [`CancelState`].
///
/// The default token is inert: it can never report cancellation. Tokens are
/// cheap to clone and safe to carry across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Option<Arc<CancelState>>,
}

impl CancelToken {
    pub(crate) fn new(state: Arc<CancelState>) -> Self {
        Self { state: Some(state) }
    }

    /// Whether this token is bound to a state at all.
    pub fn can_cancel(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.is_cancelled())
    }
}

/// Owner of a [`CancelState`] with the authority to flip it.
///
/// Cloning a source yields another owner of the same state; the state is
/// freed when the last source or token drops.
#[derive(Debug, Clone)]
pub struct CancelSource {
    state: Arc<CancelState>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState::default()),
        }
    }

    /// A token observing this source's state.
    pub fn token(&self) -> CancelToken {
        CancelToken::new(self.state.clone())
    }

    pub fn request_cancel(&self) {
        self.state.request_cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}
