//! Dual reference counting for objects with two classes of refs.
//!
//! This module provides [`DualRefCount`], a lifecycle primitive packing two
//! independent reference counts into a single atomic word, together with the
//! [`DualArc`] / [`WeakDualArc`] handle types built on top of it.
//!
//! Strong refs represent external callers; weak refs represent internal
//! callbacks that must be allowed to complete before the object is freed.
//! When the strong count reaches zero the object is *orphaned* (it begins
//! shutting down); when both counts reach zero it is destroyed.
//!
//! # Layout
//!
//! Both counts live in one `AtomicU64`: the strong count occupies the high
//! 32 bits and the weak count the low 32 bits. This makes the orphan
//! transition a single fused operation: [`DualRefCount::unref`] performs
//! `strong -= 1, weak += 1` in one atomic add, so the orphan callback always
//! runs while at least one weak ref protects the allocation. No separate
//! fence is required.
//!
//! # Ordering
//!
//! - Increments use `Relaxed`: acquiring a new ref from an existing one
//!   needs atomicity only.
//! - Decrements that may orphan or destroy use `AcqRel`: the release makes
//!   prior writes visible to whichever thread performs the final drop, and
//!   the acquire makes those writes visible to the destructor.
//! - The conditional increments use `compare_exchange_weak` with `AcqRel`
//!   on success so a successful revival synchronizes with the orphan path.

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::loom::sync::atomic::AtomicU64;
use crate::loom::sync::atomic::Ordering::AcqRel;
use crate::loom::sync::atomic::Ordering::Acquire;
use crate::loom::sync::atomic::Ordering::Relaxed;

// -----------------------------------------------------------------------------
// Ref Pair
// -----------------------------------------------------------------------------

/// Packs a `(strong, weak)` pair into a single word.
///
/// The strong count is stored in the high 32 bits, the weak count in the
/// low 32 bits.
#[inline]
const fn ref_pair(strong: u32, weak: u32) -> u64 {
  ((strong as u64) << 32) | weak as u64
}

#[inline]
const fn strong_refs(pair: u64) -> u32 {
  (pair >> 32) as u32
}

#[inline]
const fn weak_refs(pair: u64) -> u32 {
  pair as u32
}

// Adding this value to the packed word decrements the strong count by one
// and increments the weak count by one in a single operation. The weak
// increment cannot carry into the strong half because the weak count never
// approaches `u32::MAX`.
const UNREF_SWAP: u64 = ref_pair(u32::MAX, 1);

// -----------------------------------------------------------------------------
// Dual Ref Count
// -----------------------------------------------------------------------------

/// A pair of reference counts sharing one atomic word.
///
/// This type only tracks the counts; the caller decides what orphaning and
/// destruction mean. [`DualArc`] wires the transitions to the
/// [`DualRefCounted`] trait and the allocation lifetime.
#[repr(transparent)]
pub struct DualRefCount {
  refs: AtomicU64,
}

impl DualRefCount {
  /// Creates a new count with `initial_strong` strong refs and no weak refs.
  #[inline]
  pub fn new(initial_strong: u32) -> Self {
    Self {
      refs: AtomicU64::new(ref_pair(initial_strong, 0)),
    }
  }

  /// Increments the strong count.
  ///
  /// The caller must already hold a strong ref; taking a strong ref on an
  /// orphaned object is a programming fault and asserts in debug builds.
  #[inline]
  pub fn ref_(&self) {
    let prev: u64 = self.refs.fetch_add(ref_pair(1, 0), Relaxed);

    debug_assert_ne!(strong_refs(prev), 0, "strong ref taken on orphaned object");
  }

  /// Attempts to increment the strong count, failing if it is zero.
  ///
  /// Returns `true` if a strong ref was acquired. This is the only safe way
  /// to obtain a strong ref from a holder that has none (e.g. upgrading a
  /// weak handle).
  pub fn ref_if_non_zero(&self) -> bool {
    let mut prev: u64 = self.refs.load(Acquire);

    loop {
      if strong_refs(prev) == 0 {
        return false;
      }

      match self
        .refs
        .compare_exchange_weak(prev, prev + ref_pair(1, 0), AcqRel, Acquire)
      {
        Ok(_) => return true,
        Err(next) => prev = next,
      }
    }
  }

  /// Increments the weak count.
  ///
  /// The caller must hold some ref (strong or weak); debug-checked.
  #[inline]
  pub fn weak_ref(&self) {
    let prev: u64 = self.refs.fetch_add(ref_pair(0, 1), Relaxed);

    debug_assert_ne!(prev, 0, "weak ref taken on destroyed object");
  }

  /// Attempts to increment the weak count, failing if both counts are zero.
  ///
  /// Returns `true` if a weak ref was acquired.
  pub fn weak_ref_if_non_zero(&self) -> bool {
    let mut prev: u64 = self.refs.load(Acquire);

    loop {
      if prev == 0 {
        return false;
      }

      match self
        .refs
        .compare_exchange_weak(prev, prev + ref_pair(0, 1), AcqRel, Acquire)
      {
        Ok(_) => return true,
        Err(next) => prev = next,
      }
    }
  }

  /// Drops a strong ref, converting it into a weak ref.
  ///
  /// Returns `true` iff this call dropped the *last* strong ref, in which
  /// case the caller must run its orphan behavior and then release the
  /// temporary weak ref with [`weak_unref`]. The fused swap guarantees the
  /// orphan behavior runs while the allocation is still protected.
  ///
  /// [`weak_unref`]: Self::weak_unref
  #[inline]
  pub fn unref(&self) -> bool {
    let prev: u64 = self.refs.fetch_add(UNREF_SWAP, AcqRel);

    debug_assert_ne!(strong_refs(prev), 0, "strong count underflow");

    strong_refs(prev) == 1
  }

  /// Drops a weak ref.
  ///
  /// Returns `true` iff this call observed the transition to `(0, 0)`, in
  /// which case the caller must destroy the object. The transition is
  /// observed by exactly one caller.
  #[inline]
  pub fn weak_unref(&self) -> bool {
    let prev: u64 = self.refs.fetch_sub(ref_pair(0, 1), AcqRel);

    debug_assert_ne!(weak_refs(prev), 0, "weak count underflow");

    prev == ref_pair(0, 1)
  }

  /// Returns `true` if at least one strong ref is held.
  ///
  /// The result may be stale immediately after returning; use it only for
  /// debug checks and diagnostics.
  #[inline]
  pub fn strongly_owned(&self) -> bool {
    strong_refs(self.refs.load(Relaxed)) != 0
  }
}

impl std::fmt::Debug for DualRefCount {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let pair: u64 = self.refs.load(Relaxed);

    f.debug_struct("DualRefCount")
      .field("strong", &strong_refs(pair))
      .field("weak", &weak_refs(pair))
      .finish()
  }
}

// -----------------------------------------------------------------------------
// Dual Ref Counted
// -----------------------------------------------------------------------------

/// Behavior seam for dual-refcounted objects.
///
/// Implementors embed a [`DualRefCount`] and define what happens when the
/// last strong ref is dropped. Destruction (freeing the allocation) is
/// handled by [`DualArc`] when both counts reach zero.
pub trait DualRefCounted {
  /// Returns the embedded count.
  fn dual_count(&self) -> &DualRefCount;

  /// Called exactly once, when the strong count drops to zero.
  ///
  /// Runs while a weak ref still protects the allocation, so the
  /// implementation may publish further weak handles to itself.
  fn orphaned(&self);
}

// -----------------------------------------------------------------------------
// Dual Arc
// -----------------------------------------------------------------------------

/// An owning (strong) handle to a dual-refcounted allocation.
pub struct DualArc<T: DualRefCounted> {
  ptr: NonNull<T>,
  marker: PhantomData<T>,
}

impl<T: DualRefCounted> DualArc<T> {
  /// Moves `value` to the heap and takes over its initial strong ref.
  ///
  /// The value's [`DualRefCount`] must have been created with
  /// `DualRefCount::new(1)`; debug-checked.
  pub fn new(value: T) -> Self {
    debug_assert!(value.dual_count().strongly_owned());

    Self {
      ptr: NonNull::from(Box::leak(Box::new(value))),
      marker: PhantomData,
    }
  }

  /// Creates a weak handle to the same allocation.
  #[inline]
  pub fn downgrade(&self) -> WeakDualArc<T> {
    self.dual_count().weak_ref();

    WeakDualArc {
      ptr: self.ptr,
      marker: PhantomData,
    }
  }

  /// Reconstructs a handle from a raw pointer, taking over one strong ref.
  ///
  /// # Safety
  ///
  /// `ptr` must point to a live allocation created by [`DualArc::new`], and
  /// the caller must own one strong ref that this handle assumes.
  #[inline]
  pub(crate) unsafe fn from_raw(ptr: NonNull<T>) -> Self {
    Self {
      ptr,
      marker: PhantomData,
    }
  }

  #[inline]
  fn dual_count(&self) -> &DualRefCount {
    // SAFETY: A strong ref keeps the allocation alive.
    unsafe { self.ptr.as_ref() }.dual_count()
  }
}

impl<T: DualRefCounted> Clone for DualArc<T> {
  #[inline]
  fn clone(&self) -> Self {
    self.dual_count().ref_();

    Self {
      ptr: self.ptr,
      marker: PhantomData,
    }
  }
}

impl<T: DualRefCounted> Deref for DualArc<T> {
  type Target = T;

  #[inline]
  fn deref(&self) -> &Self::Target {
    // SAFETY: A strong ref keeps the allocation alive.
    unsafe { self.ptr.as_ref() }
  }
}

impl<T: DualRefCounted> Drop for DualArc<T> {
  fn drop(&mut self) {
    // SAFETY: The strong ref held by this handle keeps the allocation alive
    //         across the unref; the fused swap leaves a weak ref protecting
    //         it through `orphaned`.
    let this: &T = unsafe { self.ptr.as_ref() };

    if this.dual_count().unref() {
      this.orphaned();
    }

    if this.dual_count().weak_unref() {
      // SAFETY: Both counts reached zero; this thread observed the final
      //         transition and is the sole owner of the allocation.
      drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
  }
}

impl<T: DualRefCounted + std::fmt::Debug> std::fmt::Debug for DualArc<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Debug::fmt(&**self, f)
  }
}

// SAFETY: A `DualArc` is a shared reference with shared ownership; the same
//         bounds as `Arc<T>` apply.
unsafe impl<T: DualRefCounted + Send + Sync> Send for DualArc<T> {}
unsafe impl<T: DualRefCounted + Send + Sync> Sync for DualArc<T> {}

// -----------------------------------------------------------------------------
// Weak Dual Arc
// -----------------------------------------------------------------------------

/// A weak handle to a dual-refcounted allocation.
///
/// Keeps the allocation alive but does not keep it from being orphaned.
pub struct WeakDualArc<T: DualRefCounted> {
  ptr: NonNull<T>,
  marker: PhantomData<T>,
}

impl<T: DualRefCounted> WeakDualArc<T> {
  /// Reconstructs a weak handle from a raw pointer, taking over one weak
  /// ref.
  ///
  /// # Safety
  ///
  /// `ptr` must point to a live allocation created by [`DualArc::new`], and
  /// the caller must own one weak ref that this handle assumes.
  #[inline]
  pub(crate) unsafe fn from_raw(ptr: NonNull<T>) -> Self {
    Self {
      ptr,
      marker: PhantomData,
    }
  }

  /// Attempts to upgrade to a strong handle.
  ///
  /// Returns `None` if the object has been orphaned.
  #[inline]
  pub fn upgrade(&self) -> Option<DualArc<T>> {
    if self.dual_count().ref_if_non_zero() {
      // SAFETY: We just acquired a strong ref for the new handle to assume.
      Some(unsafe { DualArc::from_raw(self.ptr) })
    } else {
      None
    }
  }

  /// Returns the raw allocation pointer.
  ///
  /// The allocation is guaranteed live for as long as this weak handle
  /// exists, but the object may be orphaned; dereferencing is restricted to
  /// crate internals that tolerate the orphaned state.
  #[inline]
  pub(crate) fn as_raw(&self) -> NonNull<T> {
    self.ptr
  }

  #[inline]
  fn dual_count(&self) -> &DualRefCount {
    // SAFETY: A weak ref keeps the allocation alive.
    unsafe { self.ptr.as_ref() }.dual_count()
  }
}

impl<T: DualRefCounted> Clone for WeakDualArc<T> {
  #[inline]
  fn clone(&self) -> Self {
    self.dual_count().weak_ref();

    Self {
      ptr: self.ptr,
      marker: PhantomData,
    }
  }
}

impl<T: DualRefCounted> Drop for WeakDualArc<T> {
  fn drop(&mut self) {
    // SAFETY: The weak ref held by this handle keeps the allocation alive
    //         across the unref.
    if unsafe { self.ptr.as_ref() }.dual_count().weak_unref() {
      // SAFETY: Both counts reached zero; sole owner.
      drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
  }
}

impl<T: DualRefCounted> std::fmt::Debug for WeakDualArc<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("WeakDualArc(..)")
  }
}

// SAFETY: Same sharing model as `std::sync::Weak`.
unsafe impl<T: DualRefCounted + Send + Sync> Send for WeakDualArc<T> {}
unsafe impl<T: DualRefCounted + Send + Sync> Sync for WeakDualArc<T> {}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::AtomicU32;
  use std::sync::atomic::Ordering;
  use std::thread;

  use super::*;

  struct Flags {
    orphaned: AtomicU32,
    dropped: AtomicU32,
  }

  impl Flags {
    fn new() -> Arc<Self> {
      Arc::new(Self {
        orphaned: AtomicU32::new(0),
        dropped: AtomicU32::new(0),
      })
    }
  }

  struct Tracked {
    count: DualRefCount,
    flags: Arc<Flags>,
  }

  impl Tracked {
    fn new(flags: Arc<Flags>) -> DualArc<Self> {
      DualArc::new(Self {
        count: DualRefCount::new(1),
        flags,
      })
    }
  }

  impl DualRefCounted for Tracked {
    fn dual_count(&self) -> &DualRefCount {
      &self.count
    }

    fn orphaned(&self) {
      self.flags.orphaned.fetch_add(1, Ordering::AcqRel);
    }
  }

  impl Drop for Tracked {
    fn drop(&mut self) {
      assert_eq!(self.flags.orphaned.load(Ordering::Acquire), 1);
      self.flags.dropped.fetch_add(1, Ordering::AcqRel);
    }
  }

  #[test]
  fn test_drop_orphans_and_destroys_once() {
    let flags: Arc<Flags> = Flags::new();
    let this: DualArc<Tracked> = Tracked::new(flags.clone());

    drop(this);

    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  }

  #[test]
  fn test_clone_delays_orphan() {
    let flags: Arc<Flags> = Flags::new();
    let this: DualArc<Tracked> = Tracked::new(flags.clone());
    let that: DualArc<Tracked> = this.clone();

    drop(this);
    assert_eq!(flags.orphaned.load(Ordering::Acquire), 0);

    drop(that);
    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  }

  #[test]
  fn test_weak_outlives_strong() {
    let flags: Arc<Flags> = Flags::new();
    let this: DualArc<Tracked> = Tracked::new(flags.clone());
    let weak: WeakDualArc<Tracked> = this.downgrade();

    drop(this);

    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 0);

    drop(weak);

    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  }

  #[test]
  fn test_upgrade_after_orphan_fails() {
    let flags: Arc<Flags> = Flags::new();
    let this: DualArc<Tracked> = Tracked::new(flags.clone());
    let weak: WeakDualArc<Tracked> = this.downgrade();

    assert!(weak.upgrade().is_some());

    drop(this);

    assert!(weak.upgrade().is_none());
  }

  #[test]
  fn test_upgrade_delays_orphan() {
    let flags: Arc<Flags> = Flags::new();
    let this: DualArc<Tracked> = Tracked::new(flags.clone());
    let weak: WeakDualArc<Tracked> = this.downgrade();

    let strong: DualArc<Tracked> = weak.upgrade().unwrap();

    drop(this);
    assert_eq!(flags.orphaned.load(Ordering::Acquire), 0);

    drop(strong);
    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
  }

  #[test]
  fn test_raw_count_transitions() {
    let count: DualRefCount = DualRefCount::new(1);

    // A weak ref can be taken while any ref survives.
    assert!(count.weak_ref_if_non_zero());
    assert!(count.strongly_owned());

    // Dropping the last strong ref orphans; the fused swap leaves a weak
    // ref behind that must also be released.
    assert!(count.unref());
    assert!(!count.strongly_owned());
    assert!(!count.weak_unref());

    // Orphaned but weakly held: strong revival fails, weak revival works.
    assert!(!count.ref_if_non_zero());
    assert!(count.weak_ref_if_non_zero());
    assert!(!count.weak_unref());

    // The last weak unref observes (0, 0) exactly once.
    assert!(count.weak_unref());
    assert!(!count.weak_ref_if_non_zero());
  }

  #[test]
  fn test_ping_pong_refs() {
    const PAIRS: usize = 4_000_000;

    let flags: Arc<Flags> = Flags::new();
    let this: DualArc<Tracked> = Tracked::new(flags.clone());
    let that: DualArc<Tracked> = this.clone();

    let thread_a = thread::spawn(move || {
      for _ in 0..PAIRS {
        drop(this.clone());
      }
      drop(this);
    });

    let thread_b = thread::spawn(move || {
      for _ in 0..PAIRS {
        drop(that.clone());
      }
      drop(that);
    });

    thread_a.join().unwrap();
    thread_b.join().unwrap();

    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  }
}
