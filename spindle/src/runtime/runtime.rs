use crate::pool::ThreadPool;
use crate::runtime::builder::RuntimeConfig;
use crate::runtime::context;
use crate::scheduler::{self, Scheduler};
use crate::signal::SignalSet;
use crate::task::{JoinHandle, Task};
use crate::time::Timer;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};

pub(crate) struct Shared {
    cfg: RuntimeConfig,
    scheduler: scheduler::Handle,
    pool: OnceLock<Arc<ThreadPool>>,
    timer: OnceLock<Arc<Timer>>,
    signals: OnceLock<Arc<SignalSet>>,
}

/// The runtime container: one cooperative scheduler plus lazily created
/// blocking pool, timer and signal services.
///
/// The scheduler loop is driven by whichever thread calls
/// [`run`](Runtime::run) or [`block_on`](Runtime::block_on); every other
/// service owns its own worker thread(s) and hands completions back through
/// the scheduler queue.
///
/// Dropping the runtime stops everything in reverse dependency order
/// (signals, timer, pool, scheduler) and joins the service threads.
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    pub(crate) fn new(cfg: RuntimeConfig) -> Runtime {
        let scheduler = Scheduler::new().into_handle();
        Runtime {
            handle: Handle {
                shared: Arc::new(Shared {
                    cfg,
                    scheduler,
                    pool: OnceLock::new(),
                    timer: OnceLock::new(),
                    signals: OnceLock::new(),
                }),
            },
        }
    }

    /// A cheap, cloneable handle usable from tasks and other threads.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Drive the scheduler loop on the calling thread until
    /// [`stop`](Runtime::stop) is requested and the queue drains.
    pub fn run(&self) {
        let _guard = context::enter(self.handle.clone());
        self.handle.scheduler().run();
    }

    /// Request the scheduler loop to exit. Pending queue entries still run;
    /// suspended tasks are dropped with the runtime.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Run `future` to completion on this runtime, driving the scheduler
    /// loop on the calling thread.
    ///
    /// The future runs as an ordinary task, so it may spawn siblings, sleep,
    /// submit blocking work and wait on signals. A panic inside it resumes
    /// on the caller.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler was stopped before the future completed.
    #[track_caller]
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let _guard = context::enter(self.handle.clone());
        let scheduler = self.handle.scheduler().clone();

        let (tx, rx) = mpsc::channel();
        let stopper = scheduler.clone();
        Task::new(async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            let _ = tx.send(result);
            stopper.stop();
        })
        .start(&scheduler)
        .detach();

        scheduler.run();

        match rx.try_recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("scheduler stopped before the root task completed"),
        }
    }

    /// Start `task` on this runtime's scheduler.
    pub fn spawn<T>(&self, task: Task<T>) -> JoinHandle<T>
    where
        T: Send + 'static,
    {
        self.handle.spawn(task)
    }

    pub fn scheduler(&self) -> &scheduler::Handle {
        self.handle.scheduler()
    }

    pub fn pool(&self) -> Arc<ThreadPool> {
        self.handle.pool()
    }

    pub fn timer(&self) -> Arc<Timer> {
        self.handle.timer()
    }

    pub fn signals(&self) -> Arc<SignalSet> {
        self.handle.signals()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Reverse dependency order; each stop is idempotent and
        // non-blocking, the joins happen in the services' own drops.
        let shared = &self.handle.shared;
        if let Some(signals) = shared.signals.get() {
            signals.stop();
        }
        if let Some(timer) = shared.timer.get() {
            timer.stop();
        }
        if let Some(pool) = shared.pool.get() {
            pool.stop();
        }
        shared.scheduler.stop();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

/// A cloneable reference to a [`Runtime`].
///
/// Obtained from [`Runtime::handle`] or, inside a running task, from
/// [`runtime::current`](crate::runtime::current). Service accessors
/// instantiate the blocking pool, timer and signal set on first use.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    pub fn scheduler(&self) -> &scheduler::Handle {
        &self.shared.scheduler
    }

    pub fn pool(&self) -> Arc<ThreadPool> {
        self.shared
            .pool
            .get_or_init(|| {
                Arc::new(ThreadPool::new(
                    self.shared.scheduler.clone(),
                    &self.shared.cfg,
                ))
            })
            .clone()
    }

    pub fn timer(&self) -> Arc<Timer> {
        self.shared
            .timer
            .get_or_init(|| {
                Arc::new(Timer::new(self.shared.scheduler.clone(), &self.shared.cfg))
            })
            .clone()
    }

    pub fn signals(&self) -> Arc<SignalSet> {
        self.shared
            .signals
            .get_or_init(|| {
                Arc::new(SignalSet::new(
                    self.shared.scheduler.clone(),
                    &self.shared.cfg,
                ))
            })
            .clone()
    }

    /// Post a callable onto the scheduler queue.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.scheduler.post(f);
    }

    /// Start `task` on the scheduler, returning its join handle.
    pub fn spawn<T>(&self, task: Task<T>) -> JoinHandle<T>
    where
        T: Send + 'static,
    {
        task.start(&self.shared.scheduler)
    }

    /// Start `task` detached: its result is discarded and panics are logged.
    pub fn spawn_detached<T>(&self, task: Task<T>)
    where
        T: Send + 'static,
    {
        self.spawn(task).detach();
    }

    pub fn stop(&self) {
        self.shared.scheduler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.scheduler.is_running()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("runtime::Handle").finish_non_exhaustive()
    }
}
