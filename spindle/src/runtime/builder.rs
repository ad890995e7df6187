use crate::runtime::Runtime;
use anyhow::{Result, anyhow};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    ThreadNameFn(Arc::new(|| {
        format!("spindle-worker-{}", NEXT.fetch_add(1, Ordering::Relaxed))
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure itself isn't printable.
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Builds a [`Runtime`].
///
/// ```no_run
/// use spindle::runtime::Builder;
///
/// let rt = Builder::new()
///     .worker_threads(4)
///     .thread_name("my-app-worker")
///     .try_build()
///     .expect("failed building the runtime");
///
/// rt.block_on(async {
///     // ...
/// });
/// ```
#[derive(Debug)]
pub struct Builder {
    /// The number of blocking-pool worker threads.
    ///
    /// Defaults to one worker per CPU core. The scheduler itself is always
    /// single-threaded.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the runtime.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the runtime.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
        }
    }

    /// Sets the number of blocking-pool worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `val` is 0.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name for threads spawned by the runtime.
    ///
    /// The default yields names with a monotonically increasing counter,
    /// `spindle-worker-{N}`.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate names for threads spawned by the
    /// runtime.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater if the platform specifies a
    /// minimum.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Creates the configured [`Runtime`], ready to run tasks.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg = self.try_into()?;
        Ok(Runtime::new(cfg))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

// The builder exported as a plain config object, cloned into each service
// (pool, timer, signal set) at lazy-init time.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(anyhow!("worker_threads must be greater than 0"));
        }
        Ok(())
    }

    /// A `std::thread::Builder` honoring the configured stack size.
    pub(crate) fn thread_builder(&self, purpose: &str) -> thread::Builder {
        let mut builder = thread::Builder::new().name(format!("spindle-{purpose}"));
        if let Some(stack_size) = self.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }
        builder
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = RuntimeConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
