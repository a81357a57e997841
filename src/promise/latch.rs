//! Cross-activity latches.
//!
//! An [`InterActivityLatch`] resolves every waiter (present and future)
//! with a copy of the value it was set with. Waiters may live on different
//! parties; the latch wakes each one through the waker it captured while
//! parked.

use parking_lot::Mutex;
use triomphe::Arc;

use crate::consts::CAP_PIPE_WAITERS;
use crate::party::Party;
use crate::party::Waker;
use crate::promise::Poll;
use crate::promise::Promise;

struct LatchInner<T> {
  value: Option<T>,
  waiters: Vec<Waker>,
}

/// A latch that activities on any party can wait on.
pub struct InterActivityLatch<T> {
  inner: Arc<Mutex<LatchInner<T>>>,
}

impl<T> Clone for InterActivityLatch<T> {
  #[inline]
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> InterActivityLatch<T>
where
  T: Clone + Send,
{
  /// Creates an unset latch.
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(LatchInner {
        value: None,
        waiters: Vec::with_capacity(CAP_PIPE_WAITERS),
      })),
    }
  }

  /// Sets the latch, waking every parked waiter.
  ///
  /// The latch is one-shot: later sets are dropped.
  pub fn set(&self, value: T) {
    let waiters: Vec<Waker> = {
      let mut inner = self.inner.lock();

      if inner.value.is_some() {
        return;
      }

      inner.value = Some(value);
      std::mem::take(&mut inner.waiters)
    };

    for mut waiter in waiters {
      waiter.wakeup();
    }
  }

  /// Returns `true` once the latch has been set.
  pub fn is_set(&self) -> bool {
    self.inner.lock().value.is_some()
  }

  /// Returns a promise resolving with a copy of the latch value.
  #[inline]
  pub fn wait(&self) -> Wait<T> {
    Wait {
      latch: self.clone(),
    }
  }

  fn poll_wait(&self) -> Poll<T> {
    let mut inner = self.inner.lock();

    if let Some(value) = &inner.value {
      Poll::Ready(value.clone())
    } else {
      inner.waiters.push(Party::make_non_owning_waker());
      Poll::Pending
    }
  }
}

impl<T> Default for InterActivityLatch<T>
where
  T: Clone + Send,
{
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl<T> std::fmt::Debug for InterActivityLatch<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("InterActivityLatch(..)")
  }
}

/// Promise returned by [`InterActivityLatch::wait`].
pub struct Wait<T> {
  latch: InterActivityLatch<T>,
}

impl<T> Promise for Wait<T>
where
  T: Clone + Send,
{
  type Output = T;

  #[inline]
  fn poll(&mut self) -> Poll<T> {
    self.latch.poll_wait()
  }
}
