//! The party: a cooperative multi-participant activity.
//!
//! A party owns up to [`MAX_PARTICIPANTS`] participant promises and runs
//! them under a mutual-exclusion discipline: any number of threads may
//! spawn into or wake a party concurrently, but at most one thread at a
//! time drives its participant polls, so the participants of one party
//! never race with each other. Distinct parties run in parallel.
//!
//! # Lifecycle
//!
//! Parties are handed out as [`DualArc`] handles. Dropping the last strong
//! handle *orphans* the party: the cancellation flag is set, the waker
//! generation advances, and every live participant is woken once to observe
//! the cancellation. The party state is swept as soon as the last in-flight
//! operation drains, and the allocation is freed when the last weak handle
//! (a non-owning waker, usually) goes away.
//!
//! # Driving
//!
//! Whichever thread's spawn or wake acquires the run lock drives the party
//! inline. Two exceptions route the run to the event engine instead: a
//! thread that is already driving some party (running a second one on the
//! same stack could deadlock two parties against each other), and
//! [`Waker::wakeup_async`], which callers use while holding external locks.
//!
//! [`MAX_PARTICIPANTS`]: crate::consts::MAX_PARTICIPANTS

mod context;
mod participant;
mod waker;

pub use self::waker::Waker;

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use tracing::trace;

use crate::arena::ArenaRef;
use crate::consts::MAX_PARTICIPANTS;
use crate::engine::EngineRef;
use crate::engine::default_engine;
use crate::error::raise;
use crate::loom::sync::atomic::AtomicBool;
use crate::loom::sync::atomic::AtomicU32;
use crate::loom::sync::atomic::Ordering::AcqRel;
use crate::loom::sync::atomic::Ordering::Acquire;
use crate::party::context::PollScope;
use crate::party::participant::Participant;
use crate::party::participant::ParticipantImpl;
use crate::promise::InterActivityLatch;
use crate::promise::Poll;
use crate::promise::Promise;
use crate::promise::Wait;
use crate::sync::DualArc;
use crate::sync::DualRefCount;
use crate::sync::DualRefCounted;
use crate::sync::PartySync;
use crate::sync::PartySyncUsingAtomics;
use crate::sync::WeakDualArc;

// -----------------------------------------------------------------------------
// Party
// -----------------------------------------------------------------------------

/// A cooperative activity scheduling up to [`MAX_PARTICIPANTS`] promises.
///
/// [`MAX_PARTICIPANTS`]: crate::consts::MAX_PARTICIPANTS
pub struct Party {
  sync: PartySyncUsingAtomics,
  participants: [UnsafeCell<Option<Box<dyn Participant>>>; MAX_PARTICIPANTS],
  arena: ArenaRef,
  engine: EngineRef,
  count: DualRefCount,
  generation: AtomicU32,
  cancelled: AtomicBool,
}

// SAFETY: The participant cells are written either under an exclusive slot
//         reservation (before the slot's wakeup bit is published) or while
//         holding the run lock; every other field is itself thread-safe.
unsafe impl Send for Party {}
unsafe impl Sync for Party {}

impl DualRefCounted for Party {
  #[inline]
  fn dual_count(&self) -> &DualRefCount {
    &self.count
  }

  fn orphaned(&self) {
    trace!(target: "convoke", party = ?NonNull::from(self), "orphaned");

    self.cancel();

    // Drop the ref the party was constructed with; once the in-flight
    // operations drain, the final sweep runs.
    if self.sync.unref() {
      self.party_over();
    }
  }
}

impl Party {
  /// Creates a new party scheduling onto `arena`.
  ///
  /// The arena must advertise an [`EngineRef`] capability; parties defer
  /// runs and timers onto it.
  pub fn new(arena: ArenaRef) -> DualArc<Self> {
    let engine: Option<EngineRef> = arena.get_context::<EngineRef>();

    debug_assert!(engine.is_some(), "party arena has no event engine");

    DualArc::new(Self {
      sync: PartySyncUsingAtomics::new(1),
      participants: std::array::from_fn(|_| UnsafeCell::new(None)),
      arena,
      engine: engine.unwrap_or_else(default_engine),
      count: DualRefCount::new(1),
      generation: AtomicU32::new(1),
      cancelled: AtomicBool::new(false),
    })
  }

  /// Returns the arena this party schedules onto.
  #[inline]
  pub fn arena(&self) -> &ArenaRef {
    &self.arena
  }

  // ---------------------------------------------------------------------------
  // Spawning
  // ---------------------------------------------------------------------------

  /// Spawns `promise` as a new participant.
  ///
  /// The promise is polled until it resolves; its result is then passed to
  /// `on_done` and the slot is released. Spawning into a full party is a
  /// programming fault, and spawning into a cancelled party silently drops
  /// the promise.
  ///
  /// The spawn may run the party inline on the calling thread; by the time
  /// this returns the participant may already have completed.
  pub fn spawn<P, F>(&self, name: &'static str, promise: P, on_done: F)
  where
    P: Promise + Send + 'static,
    P::Output: Send + 'static,
    F: FnOnce(P::Output) + Send + 'static,
  {
    self.add_participants(vec![Box::new(ParticipantImpl::new(name, promise, on_done))]);
  }

  /// Spawns `promise` and returns a [`Waitable`] resolving with its result.
  ///
  /// The waitable satisfies the promise contract and may be composed into
  /// sequences running on *other* parties.
  pub fn spawn_waitable<P>(&self, name: &'static str, promise: P) -> Waitable<P::Output>
  where
    P: Promise + Send + 'static,
    P::Output: Clone + Send + 'static,
  {
    let latch: InterActivityLatch<P::Output> = InterActivityLatch::new();
    let done: InterActivityLatch<P::Output> = latch.clone();

    self.spawn(name, promise, move |value| done.set(value));

    Waitable { wait: latch.wait() }
  }

  fn add_participants(&self, mut batch: Vec<Box<dyn Participant>>) {
    debug_assert!(!batch.is_empty() && batch.len() <= MAX_PARTICIPANTS);

    if self.cancelled.load(Acquire) {
      trace!(target: "convoke", count = batch.len(), "spawn into cancelled party dropped");
      return;
    }

    let must_run: bool = self.sync.add_participants_and_ref(batch.len(), |slots| {
      for (participant, &slot) in batch.drain(..).zip(slots) {
        trace!(target: "convoke", name = participant.name(), slot, "spawn");

        // SAFETY: The reservation is exclusive and the wakeup bit is not
        //         yet published, so no runner observes this slot.
        unsafe { *self.participants[slot].get() = Some(participant) };
      }
    });

    if must_run {
      self.drive();
    }

    if self.sync.unref() {
      self.party_over();
    }
  }

  // ---------------------------------------------------------------------------
  // Cancellation
  // ---------------------------------------------------------------------------

  /// Requests cooperative cancellation.
  ///
  /// Sets the cancellation flag, advances the waker generation (wakers
  /// captured earlier become no-ops), and wakes every live participant
  /// once. A participant whose poll observes the flag must resolve
  /// promptly; one that stays pending after that final poll is dropped.
  pub fn cancel(&self) {
    if self.cancelled.swap(true, AcqRel) {
      return;
    }

    trace!(target: "convoke", party = ?NonNull::from(self), "cancel");

    self.generation.fetch_add(1, AcqRel);

    let allocated: u64 = self.sync.participants_allocated();

    if allocated != 0 {
      self.wakeup_mask(allocated);
    }
  }

  // ---------------------------------------------------------------------------
  // Poll Context
  // ---------------------------------------------------------------------------

  /// Creates a waker for the currently polling participant that holds a
  /// strong ref on its party.
  ///
  /// May only be called from inside a poll. If the party is already
  /// orphaned the returned waker is spent.
  pub fn make_owning_waker() -> Waker {
    let scope: PollScope = Self::scope();

    // SAFETY: The poll scope guarantees the party outlives the poll.
    let party: &Party = unsafe { scope.party.as_ref() };

    if party.count.ref_if_non_zero() {
      // SAFETY: We just acquired the strong ref the handle assumes.
      let strong: DualArc<Party> = unsafe { DualArc::from_raw(scope.party) };

      Waker::owning(strong, scope.slot, party.generation())
    } else {
      Waker::unwakeable()
    }
  }

  /// Creates a waker for the currently polling participant that does not
  /// keep its party alive.
  ///
  /// May only be called from inside a poll.
  pub fn make_non_owning_waker() -> Waker {
    let scope: PollScope = Self::scope();

    // SAFETY: The poll scope guarantees the party outlives the poll.
    let party: &Party = unsafe { scope.party.as_ref() };

    party.count.weak_ref();

    // SAFETY: We just acquired the weak ref the handle assumes.
    let weak: WeakDualArc<Party> = unsafe { WeakDualArc::from_raw(scope.party) };

    Waker::non_owning(weak, scope.slot, party.generation())
  }

  /// Requests that the currently polling participant be polled again before
  /// the current run releases the lock.
  ///
  /// The repoll lands in the next turn of the same run; it does not
  /// re-enter the participant recursively.
  pub fn force_immediate_repoll() {
    let scope: PollScope = Self::scope();

    // SAFETY: The poll scope guarantees the party outlives the poll.
    unsafe { scope.party.as_ref() }
      .sync
      .force_immediate_repoll(1 << scope.slot);
  }

  /// Returns `true` if the party of the currently polling participant has
  /// been cancelled.
  ///
  /// Promises observing `true` must resolve promptly with their own
  /// terminal outcome.
  pub fn is_cancelled() -> bool {
    let scope: PollScope = Self::scope();

    // SAFETY: The poll scope guarantees the party outlives the poll.
    unsafe { scope.party.as_ref() }.cancelled.load(Acquire)
  }

  /// Returns the arena of the currently polling participant's party.
  pub fn current_arena() -> ArenaRef {
    let scope: PollScope = Self::scope();

    // SAFETY: The poll scope guarantees the party outlives the poll.
    unsafe { scope.party.as_ref() }.arena.clone()
  }

  /// Returns the event engine of the currently polling participant's party.
  pub fn current_engine() -> EngineRef {
    let scope: PollScope = Self::scope();

    // SAFETY: The poll scope guarantees the party outlives the poll.
    unsafe { scope.party.as_ref() }.engine.clone()
  }

  #[inline]
  fn scope() -> PollScope {
    let Some(scope) = context::current() else {
      raise!(Error, SysInv, "no participant poll on the current thread");
    };

    scope
  }

  // ---------------------------------------------------------------------------
  // Wakeups
  // ---------------------------------------------------------------------------

  #[inline]
  pub(crate) fn generation(&self) -> u32 {
    self.generation.load(Acquire)
  }

  /// Posts wakeups for the slots in `mask`, running the party inline if
  /// this thread wins the lock (and is not already driving another party).
  pub(crate) fn wakeup_mask(&self, mask: u64) {
    if self.sync.schedule_wakeup(mask) {
      self.drive();
    }
  }

  /// Posts wakeups for the slots in `mask`, always deferring the run to
  /// the event engine.
  pub(crate) fn wakeup_async_mask(&self, mask: u64) {
    if self.sync.schedule_wakeup(mask) {
      self.defer_to_engine();
    }
  }

  // ---------------------------------------------------------------------------
  // Driving
  // ---------------------------------------------------------------------------

  /// Drives the party. The calling thread must have acquired the run lock
  /// (via a spawn or wakeup that returned must-run).
  fn drive(&self) {
    if context::is_driving() {
      // Running a second party on this stack could block it against the
      // one below; park it until the current run completes.
      context::defer(self.weak_handle());
      return;
    }

    {
      let _guard: context::DriveGuard = context::DriveGuard::enter();

      if self.sync.run_party(|slot| self.poll_one(slot)) {
        self.party_over();
      }
    }

    for weak in context::take_deferred() {
      dispatch_deferred(weak);
    }
  }

  /// Hands the run lock to an event engine thread.
  fn defer_to_engine(&self) {
    dispatch_deferred(self.weak_handle());
  }

  fn weak_handle(&self) -> WeakDualArc<Party> {
    self.count.weak_ref();

    // SAFETY: We just acquired the weak ref the handle assumes.
    unsafe { WeakDualArc::from_raw(NonNull::from(self)) }
  }

  /// Polls one participant. Returns `true` if the slot is now free.
  fn poll_one(&self, slot: usize) -> bool {
    // SAFETY: The run lock is held; slot access is exclusive.
    let cell: &mut Option<Box<dyn Participant>> = unsafe { &mut *self.participants[slot].get() };

    let Some(participant) = cell.as_mut() else {
      // Spurious wakeup of a slot that completed earlier.
      return false;
    };

    let cancelled: bool = self.cancelled.load(Acquire);
    let done: bool = context::enter_poll(self, slot, || participant.poll_step());

    if done {
      let Some(mut participant) = cell.take() else {
        unreachable!("participant vanished during its own poll");
      };

      trace!(target: "convoke", name = participant.name(), slot, "done");

      // The poll scope is cleared: on_done may spawn into this party.
      participant.deliver();
      true
    } else if cancelled {
      // The participant had its post-cancellation poll and stayed pending.
      let participant: Option<Box<dyn Participant>> = cell.take();

      trace!(
        target: "convoke",
        name = participant.as_ref().map(|p| p.name()).unwrap_or(""),
        slot,
        "dropped after cancellation",
      );

      true
    } else {
      false
    }
  }

  /// Final sweep: drops every remaining participant.
  ///
  /// Runs exactly once, when the sync refcount reaches zero; at that point
  /// the party is orphaned and no further wakeups can be posted.
  fn party_over(&self) {
    trace!(target: "convoke", party = ?NonNull::from(self), "party over");

    self.sync.lock_for_teardown();

    for cell in &self.participants {
      // SAFETY: The teardown lock grants exclusive slot access.
      let _ = unsafe { &mut *cell.get() }.take();
    }

    self.sync.unlock_after_teardown();
  }
}

impl std::fmt::Debug for Party {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Party")
      .field("sync", &self.sync)
      .field("count", &self.count)
      .finish()
  }
}

/// Runs a deferred party on its own event engine.
fn dispatch_deferred(weak: WeakDualArc<Party>) {
  // SAFETY: The weak handle keeps the allocation alive until the task has
  //         run; `run_party` tolerates the orphaned state.
  let engine: EngineRef = unsafe { weak.as_raw().as_ref() }.engine.clone();

  engine.run(Box::new(move || {
    // SAFETY: As above; the handle is dropped only after the run.
    let party: &Party = unsafe { weak.as_raw().as_ref() };

    party.drive();
    drop(weak);
  }));
}

// -----------------------------------------------------------------------------
// Bulk Spawner
// -----------------------------------------------------------------------------

/// Accumulates spawns and inserts them atomically on drop.
///
/// While the spawner is live none of its participants are visible to the
/// scheduler; the batch becomes runnable as a unit, occupying consecutive
/// free slots in spawn order.
pub struct BulkSpawner<'party> {
  party: &'party Party,
  pending: Vec<Box<dyn Participant>>,
}

impl<'party> BulkSpawner<'party> {
  /// Creates a spawner batching into `party`.
  pub fn new(party: &'party Party) -> Self {
    Self {
      party,
      pending: Vec::with_capacity(crate::consts::CAP_BULK_SPAWNER),
    }
  }

  /// Adds a participant to the batch.
  pub fn spawn<P, F>(&mut self, name: &'static str, promise: P, on_done: F)
  where
    P: Promise + Send + 'static,
    P::Output: Send + 'static,
    F: FnOnce(P::Output) + Send + 'static,
  {
    self
      .pending
      .push(Box::new(ParticipantImpl::new(name, promise, on_done)));
  }
}

impl Drop for BulkSpawner<'_> {
  fn drop(&mut self) {
    if !self.pending.is_empty() {
      self.party.add_participants(std::mem::take(&mut self.pending));
    }
  }
}

impl std::fmt::Debug for BulkSpawner<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BulkSpawner")
      .field("pending", &self.pending.len())
      .finish()
  }
}

// -----------------------------------------------------------------------------
// Waitable
// -----------------------------------------------------------------------------

/// Cross-party handle to a spawned participant's result.
///
/// Returned by [`Party::spawn_waitable`]; satisfies the promise contract,
/// so it can be composed into sequences polled on other parties.
pub struct Waitable<T> {
  wait: Wait<T>,
}

impl<T> Promise for Waitable<T>
where
  T: Clone + Send,
{
  type Output = T;

  #[inline]
  fn poll(&mut self) -> Poll<T> {
    self.wait.poll()
  }
}

impl<T> std::fmt::Debug for Waitable<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Waitable(..)")
  }
}
