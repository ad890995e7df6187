//! The task abstraction: a typed, suspendable computation.
//!
//! A [`Task`] owns its future and does nothing until it is either awaited
//! (direct handoff in the awaiter's context) or [`started`](Task::start) on
//! a scheduler, which moves the frame into a [`Harness`] and yields a
//! [`JoinHandle`]. Panics escaping a started task are captured at the frame
//! boundary and surface through the join handle; dropping the handle
//! detaches the task instead.

mod harness;
mod id;
mod join;
mod task;

pub(crate) use harness::{Harness, panic_message};
pub use id::Id;
pub use join::{JoinError, JoinHandle};
pub use task::Task;
