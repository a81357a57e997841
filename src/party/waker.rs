//! Wakers bound to a participant slot.
//!
//! A waker is the only resume path for a participant that returned
//! pending. It records the party, the slot, and the party generation at
//! capture time; a wake delivered after the generation advanced (the party
//! was cancelled or orphaned) is silently dropped.
//!
//! Waking consumes the handle: a waker is single-shot and reports
//! [`is_unwakeable`] afterwards. A participant that suspends again captures
//! a fresh waker on that poll.
//!
//! [`is_unwakeable`]: Waker::is_unwakeable

use crate::party::Party;
use crate::sync::DualArc;
use crate::sync::WeakDualArc;

enum Handle {
  /// Keeps the party alive until the wake is delivered.
  Owning(DualArc<Party>),
  /// Wakes the party only if it has not been orphaned.
  NonOwning(WeakDualArc<Party>),
  /// Consumed, or never bound.
  Unwakeable,
}

/// Schedules its participant to be polled again.
pub struct Waker {
  handle: Handle,
  slot: usize,
  generation: u32,
}

impl Waker {
  #[inline]
  pub(crate) fn owning(party: DualArc<Party>, slot: usize, generation: u32) -> Self {
    Self {
      handle: Handle::Owning(party),
      slot,
      generation,
    }
  }

  #[inline]
  pub(crate) fn non_owning(party: WeakDualArc<Party>, slot: usize, generation: u32) -> Self {
    Self {
      handle: Handle::NonOwning(party),
      slot,
      generation,
    }
  }

  /// Creates a waker that is already spent.
  #[inline]
  pub fn unwakeable() -> Self {
    Self {
      handle: Handle::Unwakeable,
      slot: 0,
      generation: 0,
    }
  }

  /// Wakes the participant, consuming the handle.
  ///
  /// May run the party inline on the calling thread. No-op if the waker is
  /// spent, the party has been orphaned, or the party generation advanced
  /// past this waker.
  pub fn wakeup(&mut self) {
    match std::mem::replace(&mut self.handle, Handle::Unwakeable) {
      Handle::Owning(party) => {
        if party.generation() == self.generation {
          party.wakeup_mask(1 << self.slot);
        }
      }
      Handle::NonOwning(weak) => {
        if let Some(party) = weak.upgrade() {
          if party.generation() == self.generation {
            party.wakeup_mask(1 << self.slot);
          }
        }
      }
      Handle::Unwakeable => {}
    }
  }

  /// Wakes the participant, deferring the party run to the event engine.
  ///
  /// Safe to call while holding locks that the participant's poll might
  /// also take: the run never happens on the calling thread.
  pub fn wakeup_async(&mut self) {
    match std::mem::replace(&mut self.handle, Handle::Unwakeable) {
      Handle::Owning(party) => {
        if party.generation() == self.generation {
          party.wakeup_async_mask(1 << self.slot);
        }
      }
      Handle::NonOwning(weak) => {
        if let Some(party) = weak.upgrade() {
          if party.generation() == self.generation {
            party.wakeup_async_mask(1 << self.slot);
          }
        }
      }
      Handle::Unwakeable => {}
    }
  }

  /// Returns `true` once the waker can no longer deliver a wake.
  #[inline]
  pub fn is_unwakeable(&self) -> bool {
    matches!(self.handle, Handle::Unwakeable)
  }
}

impl Default for Waker {
  #[inline]
  fn default() -> Self {
    Self::unwakeable()
  }
}

impl std::fmt::Debug for Waker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Waker")
      .field("slot", &self.slot)
      .field("generation", &self.generation)
      .field("unwakeable", &self.is_unwakeable())
      .finish()
  }
}
