//! A small cooperative async runtime.
//!
//! One single-threaded FIFO scheduler per [`Runtime`], a worker pool for
//! blocking jobs, deadline-ordered timers, POSIX signal delivery,
//! cooperative cancellation, and [`when_all`]/[`when_any`] combinators over
//! heterogeneous tasks. Everything off the scheduler thread hands
//! completions back through a single primitive: `scheduler.post`.
//!
//! ```no_run
//! use spindle::task::Task;
//!
//! #[spindle::main]
//! async fn main() {
//!     let doubled = spindle::spawn(Task::new(async { 21 * 2 }));
//!     assert_eq!(doubled.await.unwrap(), 42);
//! }
//! ```

#[doc(inline)]
pub use spindle_macros::main;

#[doc(inline)]
pub use spindle_macros::test;

pub mod cancel;
pub use cancel::{CancelSource, CancelToken};

pub mod error;
pub use error::{Error, ErrorKind};

pub mod pool;

pub mod runtime;
pub use runtime::{Builder, Runtime, spawn, spawn_detached};

pub mod scheduler;

pub mod signal;

pub mod task;
pub use task::{JoinHandle, Task};

pub mod time;

pub mod when;
pub use when::{when_all, when_any};

#[cfg(test)]
pub(crate) mod test_utils;
