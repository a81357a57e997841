//! Call-scoped allocation and capability storage.
//!
//! An [`ArenaRef`] is a shared handle to an arena that lives for the
//! duration of a call. It provides typed append-only allocation and a
//! type-keyed capability map through which collaborators (most importantly
//! the [`EventEngine`]) are advertised to the activities sharing the arena.
//!
//! [`EventEngine`]: crate::engine::EventEngine

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::any::TypeId;
use triomphe::Arc;

// -----------------------------------------------------------------------------
// Arena
// -----------------------------------------------------------------------------

struct ArenaInner {
  /// Append-only storage backing [`ArenaRef::alloc`]. Entries are never
  /// removed before the arena itself drops.
  allocations: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
  /// Capabilities advertised to the activities sharing this arena.
  context: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

/// Shared handle to a call-scoped arena.
#[derive(Clone)]
pub struct ArenaRef {
  inner: Arc<ArenaInner>,
}

impl ArenaRef {
  /// Creates a new, empty arena.
  pub fn new() -> Self {
    Self {
      inner: Arc::new(ArenaInner {
        allocations: Mutex::new(Vec::new()),
        context: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Moves `value` into the arena and returns a reference to it.
  ///
  /// The value lives until the last [`ArenaRef`] drops.
  pub fn alloc<T>(&self, value: T) -> &T
  where
    T: Send + Sync + 'static,
  {
    let boxed: Box<T> = Box::new(value);
    let stable: *const T = &raw const *boxed;

    self.inner.allocations.lock().push(boxed);

    // SAFETY: The box target has a stable address, the allocation list is
    //         append-only, and `self` borrows the arena for at least as
    //         long as the returned reference.
    unsafe { &*stable }
  }

  /// Advertises `value` as the capability of type `T`.
  ///
  /// A later call with the same type replaces the earlier capability.
  pub fn set_context<T>(&self, value: T)
  where
    T: Send + Sync + 'static,
  {
    let _: Option<_> = self
      .inner
      .context
      .lock()
      .insert(TypeId::of::<T>(), Box::new(value));
  }

  /// Returns a copy of the capability of type `T`, if one is advertised.
  pub fn get_context<T>(&self) -> Option<T>
  where
    T: Clone + Send + Sync + 'static,
  {
    self
      .inner
      .context
      .lock()
      .get(&TypeId::of::<T>())
      .and_then(|entry| entry.downcast_ref::<T>())
      .cloned()
  }
}

impl Default for ArenaRef {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for ArenaRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("ArenaRef(..)")
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
