use crate::runtime::{Builder, RuntimeConfig};
use crate::scheduler::{Handle, Scheduler};
use std::thread;

/// Drives a scheduler loop on a background thread for the lifetime of the
/// guard; stops and joins on drop.
pub(crate) struct SchedulerRunner {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SchedulerRunner {
    pub(crate) fn start() -> Self {
        let handle = Scheduler::new().into_handle();
        let runner = handle.clone();
        let thread = thread::Builder::new()
            .name("test-scheduler".into())
            .spawn(move || runner.run())
            .expect("failed to spawn test scheduler thread");

        Self {
            handle,
            thread: Some(thread),
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for SchedulerRunner {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A small config for service-level tests.
pub(crate) fn test_config() -> RuntimeConfig {
    Builder::new()
        .worker_threads(2)
        .try_into()
        .expect("failed to build test config")
}
