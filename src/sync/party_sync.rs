//! Participant slot synchronization for a party.
//!
//! This module provides [`PartySync`], the lock + wakeup + refcount
//! primitive underlying a party. It tracks which of the fixed participant
//! slots are occupied, which have pending wakeups, whether a thread is
//! currently running the party, and how many in-flight operations still
//! reference the state.
//!
//! Two interchangeable implementations are provided:
//!
//! - [`PartySyncUsingAtomics`]: lock-free, all state in one 64-bit word
//! - [`PartySyncUsingMutex`]: the same contract behind a mutex, kept as the
//!   reference implementation for differential testing
//!
//! # State Word
//!
//! The lock-free implementation packs everything into a single `AtomicU64`:
//!
//! ```text
//! ┌────────────────┬────────┬─────────────────┬─────────────────┐
//! │ 63 ........ 33 │   32   │ 31 .......... 16 │ 15 ........... 0 │
//! │    refcount    │ locked │    allocated     │     wakeups      │
//! └────────────────┴────────┴─────────────────┴─────────────────┘
//! ```
//!
//! A wakeup bit is only published for an allocated slot, the lock bit is
//! owned by the thread driving [`run_party`], and allocation bits are
//! cleared only from within `run_party` after a participant completes.
//!
//! # Ordering
//!
//! - Slot reservation and wakeup publication use `AcqRel` CAS: the release
//!   publishes the participant data written by the spawner, the acquire on
//!   the runner's mask exchange makes it visible before the first poll.
//! - Refcount increments are `Relaxed`; the decrement is `AcqRel` so the
//!   destroying thread observes all prior writes.
//! - The lock-release CAS is `AcqRel`: it must both publish the turn's
//!   effects and fail reliably when new wakeups raced in.
//!
//! [`run_party`]: PartySync::run_party

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::consts::MAX_PARTICIPANTS;
use crate::error::raise;
use crate::loom::hint::spin_loop;
use crate::loom::sync::atomic::AtomicU64;
use crate::loom::sync::atomic::Ordering::AcqRel;
use crate::loom::sync::atomic::Ordering::Acquire;
use crate::loom::sync::atomic::Ordering::Relaxed;

// -----------------------------------------------------------------------------
// State Word Layout
// -----------------------------------------------------------------------------

/// Mask covering one wakeup bit per participant slot.
const WAKEUP_MASK: u64 = (1 << MAX_PARTICIPANTS) - 1;

/// Offset of the allocation bits within the state word.
const ALLOCATED_SHIFT: u32 = MAX_PARTICIPANTS as u32;

/// Mask covering one allocation bit per participant slot.
const ALLOCATED_MASK: u64 = WAKEUP_MASK << ALLOCATED_SHIFT;

/// Set while a thread is driving `run_party`.
const LOCKED: u64 = 1 << (2 * MAX_PARTICIPANTS);

/// Offset of the refcount within the state word.
const REF_SHIFT: u32 = 2 * MAX_PARTICIPANTS as u32 + 1;

/// One reference, in state-word units.
const ONE_REF: u64 = 1 << REF_SHIFT;

// -----------------------------------------------------------------------------
// Party Sync
// -----------------------------------------------------------------------------

/// Lock + wakeup + refcount contract shared by both implementations.
///
/// All wakeup parameters are slot bitmasks over `0..MAX_PARTICIPANTS`.
pub trait PartySync: Send + Sync {
  /// Creates the sync with an initial refcount and no participants.
  fn new(initial_refs: u32) -> Self;

  /// Increments the refcount.
  fn increment_ref_count(&self);

  /// Decrements the refcount.
  ///
  /// Returns `true` iff this call dropped the last ref while no thread was
  /// driving the party; the caller must then destroy the party state. A
  /// drop-to-zero that races with a running turn returns `false` and
  /// transfers the destruction duty to that runner's lock release.
  #[must_use]
  fn unref(&self) -> bool;

  /// Atomically reserves `count` free slots and one ref, invokes `assign`
  /// with the reserved slot indices (strictly increasing), then publishes
  /// wakeups for those slots.
  ///
  /// Returns `true` iff publication acquired the run lock, in which case
  /// the calling thread must drive [`run_party`].
  ///
  /// Reserving more slots than are free is a programming fault: size the
  /// table for the worst-case participant count.
  ///
  /// [`run_party`]: Self::run_party
  fn add_participants_and_ref<F>(&self, count: usize, assign: F) -> bool
  where
    F: FnOnce(&[usize]);

  /// Runs wakeup turns until no pending wakeups remain, then releases the
  /// run lock.
  ///
  /// Within a turn, `poll` is invoked for each woken slot in ascending
  /// order; returning `true` marks the slot free. Wakeups posted during a
  /// turn (including [`force_immediate_repoll`]) are processed in the next
  /// turn of the same invocation. Spurious polls are permitted: `poll` may
  /// be invoked for a slot with nothing to do and must treat it as a no-op.
  ///
  /// Returns `true` iff the releasing operation observed a refcount of
  /// zero; the caller must then destroy the party state.
  ///
  /// [`force_immediate_repoll`]: Self::force_immediate_repoll
  #[must_use]
  fn run_party<F>(&self, poll: F) -> bool
  where
    F: FnMut(usize) -> bool;

  /// Requests another poll for the slots in `mask` before the current
  /// `run_party` invocation releases the lock.
  ///
  /// May only be called while the calling thread holds the run lock (i.e.
  /// from within a poll). Idempotent within a turn; the repoll lands in the
  /// next turn.
  fn force_immediate_repoll(&self, mask: u64);

  /// Posts wakeups for the allocated slots in `mask`.
  ///
  /// Returns `true` iff this call acquired the run lock, in which case the
  /// caller must drive [`run_party`] (directly, or on another thread if the
  /// current one cannot run inline). Returns `false` when a current runner
  /// will observe the wakeups, or when no slot in `mask` is allocated.
  ///
  /// [`run_party`]: Self::run_party
  #[must_use]
  fn schedule_wakeup(&self, mask: u64) -> bool;

  /// Returns the bitmask of currently allocated slots.
  ///
  /// The result may be stale immediately after returning.
  fn participants_allocated(&self) -> u64;
}

// -----------------------------------------------------------------------------
// Party Sync (Atomics)
// -----------------------------------------------------------------------------

/// Lock-free [`PartySync`] holding all state in one atomic word.
///
/// The word is padded to its own cache line: it is the single hottest
/// location of a party and false sharing with the participant array shows
/// up directly in wakeup latency.
pub struct PartySyncUsingAtomics {
  state: CachePadded<AtomicU64>,
}

impl PartySyncUsingAtomics {
  /// Publishes wakeup bits that were reserved by `add_participants_and_ref`.
  ///
  /// Unlike [`schedule_wakeup`] the bits are not masked against the
  /// allocation set: the caller just allocated them.
  ///
  /// [`schedule_wakeup`]: PartySync::schedule_wakeup
  fn post_wakeups(&self, mask: u64) -> bool {
    let mut state: u64 = self.state.load(Relaxed);

    loop {
      let acquired: bool = state & LOCKED == 0;
      let next: u64 = if acquired {
        state | mask | LOCKED
      } else {
        state | mask
      };

      match self.state.compare_exchange_weak(state, next, AcqRel, Acquire) {
        Ok(_) => return acquired,
        Err(actual) => state = actual,
      }
    }
  }

  /// Acquires the run lock outside the wakeup path.
  ///
  /// Used for the final participant sweep once the refcount has reached
  /// zero. At that point no wakeups can be posted, so contention is limited
  /// to a runner releasing the lock.
  pub(crate) fn lock_for_teardown(&self) {
    let mut state: u64 = self.state.load(Relaxed);

    loop {
      if state & LOCKED != 0 {
        spin_loop();
        state = self.state.load(Relaxed);
        continue;
      }

      match self
        .state
        .compare_exchange_weak(state, state | LOCKED, AcqRel, Relaxed)
      {
        Ok(_) => return,
        Err(actual) => state = actual,
      }
    }
  }

  /// Releases the lock taken by [`lock_for_teardown`] and clears every
  /// allocation bit.
  ///
  /// [`lock_for_teardown`]: Self::lock_for_teardown
  pub(crate) fn unlock_after_teardown(&self) {
    let _: u64 = self
      .state
      .fetch_and(!(LOCKED | ALLOCATED_MASK | WAKEUP_MASK), AcqRel);
  }
}

impl PartySync for PartySyncUsingAtomics {
  #[inline]
  fn new(initial_refs: u32) -> Self {
    Self {
      state: CachePadded::new(AtomicU64::new(u64::from(initial_refs) << REF_SHIFT)),
    }
  }

  #[inline]
  fn increment_ref_count(&self) {
    let _: u64 = self.state.fetch_add(ONE_REF, Relaxed);
  }

  #[inline]
  fn unref(&self) -> bool {
    let prev: u64 = self.state.fetch_sub(ONE_REF, AcqRel);

    debug_assert_ne!(prev >> REF_SHIFT, 0, "party refcount underflow");

    prev >> REF_SHIFT == 1 && prev & LOCKED == 0
  }

  fn add_participants_and_ref<F>(&self, count: usize, assign: F) -> bool
  where
    F: FnOnce(&[usize]),
  {
    debug_assert!(count >= 1 && count <= MAX_PARTICIPANTS);

    let mut slots: [usize; MAX_PARTICIPANTS] = [0; MAX_PARTICIPANTS];
    let mut state: u64 = self.state.load(Acquire);

    let wakeup_mask: u64 = loop {
      let allocated: u64 = (state & ALLOCATED_MASK) >> ALLOCATED_SHIFT;

      let mut updated: u64 = allocated;
      let mut mask: u64 = 0;
      let mut found: usize = 0;

      for slot in 0..MAX_PARTICIPANTS {
        if found == count {
          break;
        }

        if updated & (1 << slot) == 0 {
          updated |= 1 << slot;
          mask |= 1 << slot;
          slots[found] = slot;
          found += 1;
        }
      }

      if found < count {
        raise!(Error, SysCap, "party participant table is full");
      }

      let next: u64 = ((state & !ALLOCATED_MASK) | (updated << ALLOCATED_SHIFT)) + ONE_REF;

      match self.state.compare_exchange_weak(state, next, AcqRel, Acquire) {
        Ok(_) => break mask,
        Err(actual) => state = actual,
      }
    };

    // The reservation is exclusive: the slots are allocated but carry no
    // wakeup bit yet, so no runner will touch them until we publish below.
    assign(&slots[..count]);

    self.post_wakeups(wakeup_mask)
  }

  fn run_party<F>(&self, mut poll: F) -> bool
  where
    F: FnMut(usize) -> bool,
  {
    loop {
      // Take the turn's wakeup mask, keeping the lock bit set. The acquire
      // pairs with the release in `post_wakeups` so participant data stored
      // before publication is visible to the polls below.
      let prev: u64 = self.state.fetch_and(!WAKEUP_MASK, AcqRel);

      debug_assert_ne!(prev & LOCKED, 0, "turn executed without the lock");

      let wakeups: u64 = prev & WAKEUP_MASK;
      let mut freed: u64 = 0;

      for slot in 0..MAX_PARTICIPANTS {
        if wakeups & (1 << slot) == 0 {
          continue;
        }

        if poll(slot) {
          freed |= 1 << (ALLOCATED_SHIFT as usize + slot);
        }
      }

      // Release the lock, unless new wakeups arrived during the turn.
      let mut state: u64 = self.state.load(Relaxed);

      loop {
        if state & WAKEUP_MASK != 0 {
          if freed != 0 {
            let _: u64 = self.state.fetch_and(!freed, AcqRel);
          }

          break;
        }

        let next: u64 = state & !(LOCKED | freed);

        match self.state.compare_exchange_weak(state, next, AcqRel, Relaxed) {
          Ok(_) => return state >> REF_SHIFT == 0,
          Err(actual) => state = actual,
        }
      }
    }
  }

  #[inline]
  fn force_immediate_repoll(&self, mask: u64) {
    // The caller holds the run lock, so the release CAS in `run_party` (on
    // this same thread) is ordered after this OR and will observe the bits.
    let prev: u64 = self.state.fetch_or(mask & WAKEUP_MASK, Relaxed);

    debug_assert_ne!(prev & LOCKED, 0, "repoll requested outside a turn");
  }

  fn schedule_wakeup(&self, mask: u64) -> bool {
    let mut state: u64 = self.state.load(Acquire);

    loop {
      let arrived: u64 = mask & ((state & ALLOCATED_MASK) >> ALLOCATED_SHIFT);

      if arrived == 0 {
        return false;
      }

      let acquired: bool = state & LOCKED == 0;
      let next: u64 = if acquired {
        state | arrived | LOCKED
      } else {
        state | arrived
      };

      match self.state.compare_exchange_weak(state, next, AcqRel, Acquire) {
        Ok(_) => return acquired,
        Err(actual) => state = actual,
      }
    }
  }

  #[inline]
  fn participants_allocated(&self) -> u64 {
    (self.state.load(Acquire) & ALLOCATED_MASK) >> ALLOCATED_SHIFT
  }
}

impl std::fmt::Debug for PartySyncUsingAtomics {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state: u64 = self.state.load(Relaxed);

    f.debug_struct("PartySyncUsingAtomics")
      .field("refs", &(state >> REF_SHIFT))
      .field("locked", &(state & LOCKED != 0))
      .field("allocated", &((state & ALLOCATED_MASK) >> ALLOCATED_SHIFT))
      .field("wakeups", &(state & WAKEUP_MASK))
      .finish()
  }
}

// -----------------------------------------------------------------------------
// Party Sync (Mutex)
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct MutexState {
  refs: u32,
  allocated: u64,
  wakeups: u64,
  locked: bool,
}

/// Mutex-based [`PartySync`] with the same observable contract as the
/// atomic implementation.
#[derive(Debug)]
pub struct PartySyncUsingMutex {
  state: Mutex<MutexState>,
}

impl PartySync for PartySyncUsingMutex {
  #[inline]
  fn new(initial_refs: u32) -> Self {
    Self {
      state: Mutex::new(MutexState {
        refs: initial_refs,
        allocated: 0,
        wakeups: 0,
        locked: false,
      }),
    }
  }

  #[inline]
  fn increment_ref_count(&self) {
    self.state.lock().refs += 1;
  }

  #[inline]
  fn unref(&self) -> bool {
    let mut state = self.state.lock();

    debug_assert_ne!(state.refs, 0, "party refcount underflow");

    state.refs -= 1;
    state.refs == 0 && !state.locked
  }

  fn add_participants_and_ref<F>(&self, count: usize, assign: F) -> bool
  where
    F: FnOnce(&[usize]),
  {
    debug_assert!(count >= 1 && count <= MAX_PARTICIPANTS);

    let mut slots: [usize; MAX_PARTICIPANTS] = [0; MAX_PARTICIPANTS];
    let mut mask: u64 = 0;

    {
      let mut state = self.state.lock();
      let mut found: usize = 0;

      for slot in 0..MAX_PARTICIPANTS {
        if found == count {
          break;
        }

        if state.allocated & (1 << slot) == 0 {
          state.allocated |= 1 << slot;
          mask |= 1 << slot;
          slots[found] = slot;
          found += 1;
        }
      }

      if found < count {
        raise!(Error, SysCap, "party participant table is full");
      }

      state.refs += 1;
    }

    // The slots are reserved but not yet woken; no runner touches them.
    assign(&slots[..count]);

    let mut state = self.state.lock();

    state.wakeups |= mask;

    if state.locked {
      false
    } else {
      state.locked = true;
      true
    }
  }

  fn run_party<F>(&self, mut poll: F) -> bool
  where
    F: FnMut(usize) -> bool,
  {
    loop {
      let wakeups: u64 = {
        let mut state = self.state.lock();

        debug_assert!(state.locked, "turn executed without the lock");

        std::mem::take(&mut state.wakeups)
      };

      let mut freed: u64 = 0;

      for slot in 0..MAX_PARTICIPANTS {
        if wakeups & (1 << slot) == 0 {
          continue;
        }

        if poll(slot) {
          freed |= 1 << slot;
        }
      }

      let mut state = self.state.lock();

      state.allocated &= !freed;

      if state.wakeups == 0 {
        state.locked = false;
        return state.refs == 0;
      }
    }
  }

  #[inline]
  fn force_immediate_repoll(&self, mask: u64) {
    let mut state = self.state.lock();

    debug_assert!(state.locked, "repoll requested outside a turn");

    state.wakeups |= mask & WAKEUP_MASK;
  }

  fn schedule_wakeup(&self, mask: u64) -> bool {
    let mut state = self.state.lock();
    let arrived: u64 = mask & state.allocated;

    if arrived == 0 {
      return false;
    }

    state.wakeups |= arrived;

    if state.locked {
      false
    } else {
      state.locked = true;
      true
    }
  }

  #[inline]
  fn participants_allocated(&self) -> u64 {
    self.state.lock().allocated
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
