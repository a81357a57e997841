//! Event engine capability.
//!
//! The scheduling core never creates threads or timers of its own: it
//! consumes an [`EventEngine`] advertised through the call arena. The
//! engine provides a monotonic clock, one-shot timers, and a thread pool
//! onto which deferred party runs are pushed.
//!
//! [`TokioEngine`] is the default implementation, backed by a tokio
//! multi-thread runtime tuned via the constants in [`crate::consts`].

use std::sync::Arc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use tokio::runtime::Builder;
use tokio::runtime::Runtime;

use crate::consts::DEFAULT_EVENT_INTERVAL;
use crate::consts::DEFAULT_GLOBAL_QUEUE_INTERVAL;
use crate::consts::DEFAULT_MAX_BLOCKING_THREADS;
use crate::consts::DEFAULT_PARALLELISM;
use crate::consts::DEFAULT_THREAD_KEEP_ALIVE;
use crate::consts::DEFAULT_THREAD_STACK_SIZE;
use crate::error::fatal;

// -----------------------------------------------------------------------------
// Event Engine
// -----------------------------------------------------------------------------

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to an event engine.
pub type EngineRef = Arc<dyn EventEngine>;

/// Clock, timer, and thread pool capability consumed by parties.
pub trait EventEngine: Send + Sync {
  /// Returns the current monotonic time.
  fn now(&self) -> Instant;

  /// Runs `task` on the engine's thread pool.
  ///
  /// Tasks may block the thread they run on: a deferred party run executes
  /// participant polls, and a participant that blocks blocks its thread.
  fn run(&self, task: Task);

  /// Runs `task` on the engine's thread pool after `delay` has elapsed.
  fn run_after(&self, delay: Duration, task: Task);
}

// -----------------------------------------------------------------------------
// Tokio Engine
// -----------------------------------------------------------------------------

/// Default [`EventEngine`] backed by a tokio multi-thread runtime.
pub struct TokioEngine {
  runtime: Runtime,
}

impl TokioEngine {
  /// Creates a new engine with its own runtime.
  pub fn new() -> Self {
    let workers: usize = thread::available_parallelism()
      .map(usize::from)
      .unwrap_or(DEFAULT_PARALLELISM);

    let runtime: Runtime = match Builder::new_multi_thread()
      .worker_threads(workers)
      .event_interval(DEFAULT_EVENT_INTERVAL)
      .global_queue_interval(DEFAULT_GLOBAL_QUEUE_INTERVAL)
      .max_blocking_threads(DEFAULT_MAX_BLOCKING_THREADS)
      .thread_keep_alive(DEFAULT_THREAD_KEEP_ALIVE)
      .thread_stack_size(DEFAULT_THREAD_STACK_SIZE)
      .thread_name("convoke-engine")
      .enable_time()
      .build()
    {
      Ok(runtime) => runtime,
      Err(error) => fatal!(error),
    };

    Self { runtime }
  }
}

impl Default for TokioEngine {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl EventEngine for TokioEngine {
  #[inline]
  fn now(&self) -> Instant {
    Instant::now()
  }

  fn run(&self, task: Task) {
    // Deferred runs may block, so they go to the blocking pool rather than
    // the async workers.
    let _ = self.runtime.spawn_blocking(task);
  }

  fn run_after(&self, delay: Duration, task: Task) {
    let handle: tokio::runtime::Handle = self.runtime.handle().clone();

    let _ = self.runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = handle.spawn_blocking(task);
    });
  }
}

impl std::fmt::Debug for TokioEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("TokioEngine(..)")
  }
}

// -----------------------------------------------------------------------------
// Default Engine
// -----------------------------------------------------------------------------

static DEFAULT_ENGINE: OnceLock<EngineRef> = OnceLock::new();

/// Installs the process-wide default engine.
///
/// The slot is one-shot: the first caller wins and `set_default_engine`
/// returns `true`; later calls leave the installed engine in place and
/// return `false`. Must be called before the first [`default_engine`] use
/// to take effect.
pub fn set_default_engine(engine: EngineRef) -> bool {
  DEFAULT_ENGINE.set(engine).is_ok()
}

/// Returns the process-wide default engine, creating a [`TokioEngine`] on
/// first use if none was installed.
pub fn default_engine() -> EngineRef {
  DEFAULT_ENGINE
    .get_or_init(|| Arc::new(TokioEngine::new()))
    .clone()
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
