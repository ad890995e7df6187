use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A unit of work the scheduler can execute.
///
/// Either a resumption of a suspended task (the task re-polls itself when
/// run) or an owned one-shot callable. Completion sources off the scheduler
/// thread only ever enqueue one of these two shapes.
pub(crate) enum Job {
    Resume(Arc<dyn Runnable>),
    Run(Box<dyn FnOnce() + Send>),
}

impl Job {
    pub(crate) fn execute(self) {
        match self {
            Job::Resume(task) => task.run(),
            Job::Run(f) => f(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Resume(_) => f.write_str("Job::Resume"),
            Job::Run(_) => f.write_str("Job::Run"),
        }
    }
}

/// A task frame that can be driven one step from the run queue.
pub(crate) trait Runnable: Send + Sync {
    fn run(self: Arc<Self>);
}

#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    pub(crate) jobs: VecDeque<Job>,
    pub(crate) stop_requested: bool,
}
