//! Thread-local poll and drive state.
//!
//! A participant poll runs with a *poll scope* installed so the promise can
//! reach its party (for wakers, repoll requests, the arena, and the
//! cancellation flag). Scopes nest: waking another party from inside a poll
//! may start a fresh run on the same thread.
//!
//! The *drive* flag marks a thread that is currently executing a party run.
//! A run that becomes necessary while the flag is set (spawning into
//! another party from a poll, for instance) must not recurse into that
//! party on the same stack; it is parked in the deferral queue and handed
//! to the event engine once the current run completes.

use std::cell::Cell;
use std::cell::RefCell;
use std::ptr::NonNull;

use crate::party::Party;
use crate::sync::WeakDualArc;

thread_local! {
  static CURRENT: Cell<Option<PollScope>> = const { Cell::new(None) };
  static DRIVING: Cell<bool> = const { Cell::new(false) };
  static DEFERRED: RefCell<Vec<WeakDualArc<Party>>> = const { RefCell::new(Vec::new()) };
}

/// Identity of the currently polling participant.
#[derive(Clone, Copy)]
pub(crate) struct PollScope {
  pub(crate) party: NonNull<Party>,
  pub(crate) slot: usize,
}

/// Runs `f` with the poll scope installed, restoring the previous scope on
/// exit.
pub(crate) fn enter_poll<R, F>(party: &Party, slot: usize, f: F) -> R
where
  F: FnOnce() -> R,
{
  struct Restore(Option<PollScope>);

  impl Drop for Restore {
    fn drop(&mut self) {
      CURRENT.set(self.0);
    }
  }

  let scope: PollScope = PollScope {
    party: NonNull::from(party),
    slot,
  };

  let restore: Restore = Restore(CURRENT.replace(Some(scope)));
  let result: R = f();

  drop(restore);
  result
}

/// Returns the scope of the poll executing on this thread, if any.
#[inline]
pub(crate) fn current() -> Option<PollScope> {
  CURRENT.get()
}

/// Returns `true` while a party run is executing on this thread.
#[inline]
pub(crate) fn is_driving() -> bool {
  DRIVING.get()
}

/// Marks this thread as driving a party run for the guard's lifetime.
pub(crate) struct DriveGuard(());

impl DriveGuard {
  pub(crate) fn enter() -> Self {
    debug_assert!(!DRIVING.get());
    DRIVING.set(true);
    Self(())
  }
}

impl Drop for DriveGuard {
  fn drop(&mut self) {
    DRIVING.set(false);
  }
}

/// Parks a party whose run must wait for the current run to complete.
///
/// The weak handle keeps the allocation alive until the deferred run is
/// dispatched.
#[inline]
pub(crate) fn defer(party: WeakDualArc<Party>) {
  DEFERRED.with_borrow_mut(|deferred| deferred.push(party));
}

/// Takes the parties parked during the run that just completed, in the
/// order they were parked.
#[inline]
pub(crate) fn take_deferred() -> Vec<WeakDualArc<Party>> {
  DEFERRED.with_borrow_mut(std::mem::take)
}
