//! Runtime configuration constants and default values.
//!
//! This module defines the fundamental limits, default behaviors, and tuning
//! parameters for the Convoke scheduling core. These constants control
//! everything from participant table sizing to engine thread pool behavior.

use std::time::Duration;

// -----------------------------------------------------------------------------
// Party Limits
// -----------------------------------------------------------------------------

/// Maximum number of participant slots in a single [`Party`].
///
/// The participant table is sized so that one wakeup bit and one allocation
/// bit per slot fit in the party state word alongside the lock bit and a
/// 31-bit reference count. Sixteen slots covers the worst-case participant
/// count of a single call activity.
///
/// [`Party`]: crate::party::Party
pub const MAX_PARTICIPANTS: usize = 16;

// -----------------------------------------------------------------------------
// Engine Behavior
// -----------------------------------------------------------------------------

/// Default parallelism used when host CPU information is unavailable.
///
/// This value determines the number of engine worker threads created when
/// the system cannot detect CPU count. In practice, CPU detection usually
/// succeeds, making this a fallback value.
pub const DEFAULT_PARALLELISM: usize = 1;

/// Scheduler ticks between polling for external events.
///
/// The engine checks for external wakeups every 61 ticks. Lower values
/// improve responsiveness but increase polling overhead. Higher values
/// reduce overhead but may delay event processing.
pub const DEFAULT_EVENT_INTERVAL: u32 = 61;

/// Scheduler ticks between polling the global task queue.
///
/// The engine checks the global queue every 31 ticks to balance fairness
/// between local and global tasks.
pub const DEFAULT_GLOBAL_QUEUE_INTERVAL: u32 = 31;

/// Maximum number of additional blocking threads spawned by the engine.
///
/// Deferred party runs execute on blocking threads created on demand. This
/// limit prevents unbounded thread creation when many parties defer their
/// runs simultaneously.
pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;

/// Duration that idle blocking threads are kept alive.
///
/// Blocking threads that remain idle for longer than this duration are
/// eligible for termination.
pub const DEFAULT_THREAD_KEEP_ALIVE: Duration = Duration::from_millis(10 * 1000);

/// Stack size allocated for each engine worker thread.
///
/// This value applies to both async worker threads and blocking task
/// threads.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

// -----------------------------------------------------------------------------
// Memory Allocation
// -----------------------------------------------------------------------------

/// Initial capacity of a bulk spawner's pending participant buffer.
pub(crate) const CAP_BULK_SPAWNER: usize = 8;

/// Initial capacity of the waiter lists attached to latches and pipes.
pub(crate) const CAP_PIPE_WAITERS: usize = 2;

/// Bounded depth of a call spine's per-direction message stream.
///
/// A depth of one gives rendezvous semantics: a sender parks until the
/// receiver has drained the previous message, which is what keeps the
/// initiator/handler pumps in lock step.
pub(crate) const CAP_MESSAGE_STREAM: usize = 1;
