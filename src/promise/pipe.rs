//! Bounded rendezvous streams between activities.
//!
//! A [`Pipe`] carries a bounded stream of values between two activities,
//! typically the two sides of a call spine. Pushing parks the sender until
//! the receiver has drained enough of the queue; pulling parks the receiver
//! until a value arrives or the stream ends. A [`Oneshot`] carries at most
//! one value and is used for metadata exchange.
//!
//! A pipe ends in one of two ways:
//!
//! - [`finish`]: no *new* pushes are accepted, but values already queued
//!   and pushes already in flight are delivered before the receiver
//!   observes the end of the stream;
//! - [`close`]: the stream is torn down; parked pushes resolve unsent and
//!   only already-queued values remain pullable.
//!
//! Parked sides register non-owning wakers so a pipe never keeps an
//! orphaned party alive; a wake that arrives after orphaning is a silent
//! no-op.
//!
//! [`finish`]: Pipe::finish
//! [`close`]: Pipe::close

use parking_lot::Mutex;
use std::collections::VecDeque;
use triomphe::Arc;

use crate::consts::CAP_PIPE_WAITERS;
use crate::party::Party;
use crate::party::Waker;
use crate::promise::Poll;
use crate::promise::Promise;

// -----------------------------------------------------------------------------
// Pipe
// -----------------------------------------------------------------------------

struct PipeInner<T> {
  queue: VecDeque<T>,
  capacity: usize,
  /// No new pushes; in-flight pushes still complete.
  finishing: bool,
  /// Hard stop; parked pushes resolve unsent.
  closed: bool,
  /// Pushes accepted but not yet queued or abandoned.
  inflight: usize,
  on_item: Vec<Waker>,
  on_space: Vec<Waker>,
}

impl<T> PipeInner<T> {
  /// The receiver has reached the end of the stream.
  #[inline]
  fn ended(&self) -> bool {
    self.queue.is_empty() && (self.closed || (self.finishing && self.inflight == 0))
  }
}

/// A bounded stream of values between two activities.
pub struct Pipe<T> {
  inner: Arc<Mutex<PipeInner<T>>>,
}

impl<T> Clone for Pipe<T> {
  #[inline]
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Send> Pipe<T> {
  /// Creates a pipe holding at most `capacity` undelivered values.
  pub fn new(capacity: usize) -> Self {
    debug_assert!(capacity >= 1);

    Self {
      inner: Arc::new(Mutex::new(PipeInner {
        queue: VecDeque::with_capacity(capacity),
        capacity,
        finishing: false,
        closed: false,
        inflight: 0,
        on_item: Vec::with_capacity(CAP_PIPE_WAITERS),
        on_space: Vec::with_capacity(CAP_PIPE_WAITERS),
      })),
    }
  }

  /// Returns a promise that delivers `value` into the pipe.
  ///
  /// Resolves to `true` once the value is queued, or `false` (dropping the
  /// value) if the pipe ended first. A push created after [`finish`] or
  /// [`close`] is rejected immediately.
  ///
  /// [`finish`]: Self::finish
  /// [`close`]: Self::close
  pub fn push(&self, value: T) -> Push<T> {
    let accepted: bool = {
      let mut inner = self.inner.lock();

      if inner.finishing || inner.closed {
        false
      } else {
        inner.inflight += 1;
        true
      }
    };

    Push {
      pipe: self.clone(),
      value: accepted.then_some(value),
      resolved: !accepted,
    }
  }

  /// Returns a promise that yields the next value, or `None` once the
  /// stream has ended.
  #[inline]
  pub fn next(&self) -> Next<T> {
    Next { pipe: self.clone() }
  }

  /// Ends the stream gracefully.
  ///
  /// Queued values and in-flight pushes are still delivered; the receiver
  /// observes the end once they drain.
  pub fn finish(&self) {
    let wakers: Vec<Waker> = {
      let mut inner = self.inner.lock();

      inner.finishing = true;
      std::mem::take(&mut inner.on_item)
    };

    wake_all(wakers);
  }

  /// Tears the stream down.
  ///
  /// Parked pushes resolve unsent; values already queued remain pullable.
  pub fn close(&self) {
    let wakers: Vec<Waker> = {
      let mut inner = self.inner.lock();

      inner.closed = true;

      let mut wakers: Vec<Waker> = std::mem::take(&mut inner.on_item);
      wakers.append(&mut inner.on_space);
      wakers
    };

    wake_all(wakers);
  }

  fn poll_push(&self, value: &mut Option<T>) -> Poll<bool> {
    let (result, wakers): (Poll<bool>, Vec<Waker>) = {
      let mut inner = self.inner.lock();

      if inner.closed {
        let _ = value.take();
        inner.inflight -= 1;

        // The receiver may be parked waiting for this push to settle.
        (Poll::Ready(false), std::mem::take(&mut inner.on_item))
      } else if inner.queue.len() < inner.capacity {
        let Some(value) = value.take() else {
          unreachable!("push promise resolved twice");
        };

        inner.queue.push_back(value);
        inner.inflight -= 1;
        (Poll::Ready(true), std::mem::take(&mut inner.on_item))
      } else {
        inner.on_space.push(Party::make_non_owning_waker());
        (Poll::Pending, Vec::new())
      }
    };

    wake_all(wakers);
    result
  }

  pub(crate) fn poll_next(&self) -> Poll<Option<T>> {
    let (result, wakers): (Poll<Option<T>>, Vec<Waker>) = {
      let mut inner = self.inner.lock();

      if let Some(value) = inner.queue.pop_front() {
        (Poll::Ready(Some(value)), std::mem::take(&mut inner.on_space))
      } else if inner.ended() {
        (Poll::Ready(None), Vec::new())
      } else {
        inner.on_item.push(Party::make_non_owning_waker());
        (Poll::Pending, Vec::new())
      }
    };

    wake_all(wakers);
    result
  }

}

impl<T> Pipe<T> {
  /// Settles an abandoned in-flight push.
  fn abandon_push(&self) {
    let wakers: Vec<Waker> = {
      let mut inner = self.inner.lock();

      inner.inflight -= 1;

      if inner.ended() {
        std::mem::take(&mut inner.on_item)
      } else {
        Vec::new()
      }
    };

    wake_all(wakers);
  }
}

impl<T> std::fmt::Debug for Pipe<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Pipe(..)")
  }
}

/// Promise returned by [`Pipe::push`].
pub struct Push<T> {
  pipe: Pipe<T>,
  value: Option<T>,
  resolved: bool,
}

impl<T: Send> Promise for Push<T> {
  type Output = bool;

  fn poll(&mut self) -> Poll<bool> {
    if self.resolved {
      return Poll::Ready(false);
    }

    let result: Poll<bool> = self.pipe.poll_push(&mut self.value);

    if result.is_ready() {
      self.resolved = true;
    }

    result
  }
}

impl<T> Drop for Push<T> {
  fn drop(&mut self) {
    if !self.resolved {
      // Dropped while in flight (its participant was cancelled); settle
      // the accounting so a finishing receiver is not left parked.
      self.pipe.abandon_push();
    }
  }
}

/// Promise returned by [`Pipe::next`].
pub struct Next<T> {
  pipe: Pipe<T>,
}

impl<T: Send> Promise for Next<T> {
  type Output = Option<T>;

  #[inline]
  fn poll(&mut self) -> Poll<Option<T>> {
    self.pipe.poll_next()
  }
}

// -----------------------------------------------------------------------------
// Oneshot
// -----------------------------------------------------------------------------

struct OneshotInner<T> {
  value: Option<T>,
  resolved: bool,
  on_item: Vec<Waker>,
}

/// A stream of at most one value.
///
/// Closing without a value resolves pending pulls with `None`.
pub struct Oneshot<T> {
  inner: Arc<Mutex<OneshotInner<T>>>,
}

impl<T> Clone for Oneshot<T> {
  #[inline]
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Send> Oneshot<T> {
  /// Creates an empty oneshot.
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(OneshotInner {
        value: None,
        resolved: false,
        on_item: Vec::with_capacity(CAP_PIPE_WAITERS),
      })),
    }
  }

  /// Creates a oneshot already holding `value`.
  pub fn with_value(value: T) -> Self {
    Self {
      inner: Arc::new(Mutex::new(OneshotInner {
        value: Some(value),
        resolved: true,
        on_item: Vec::new(),
      })),
    }
  }

  /// Delivers `value`, waking parked pulls.
  ///
  /// The oneshot is single-shot: a value set after it resolved is dropped.
  pub fn set(&self, value: T) {
    let wakers: Vec<Waker> = {
      let mut inner = self.inner.lock();

      if inner.resolved {
        return;
      }

      inner.value = Some(value);
      inner.resolved = true;
      std::mem::take(&mut inner.on_item)
    };

    wake_all(wakers);
  }

  /// Resolves without a value; parked pulls yield `None`.
  pub fn close(&self) {
    let wakers: Vec<Waker> = {
      let mut inner = self.inner.lock();

      inner.resolved = true;
      std::mem::take(&mut inner.on_item)
    };

    wake_all(wakers);
  }

  /// Returns a promise yielding the value, or `None` if the oneshot
  /// resolved without one.
  #[inline]
  pub fn pull(&self) -> Pull<T> {
    Pull {
      oneshot: self.clone(),
    }
  }

  fn poll_pull(&self) -> Poll<Option<T>> {
    let mut inner = self.inner.lock();

    if let Some(value) = inner.value.take() {
      Poll::Ready(Some(value))
    } else if inner.resolved {
      Poll::Ready(None)
    } else {
      inner.on_item.push(Party::make_non_owning_waker());
      Poll::Pending
    }
  }
}

impl<T: Send> Default for Oneshot<T> {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl<T> std::fmt::Debug for Oneshot<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Oneshot(..)")
  }
}

/// Promise returned by [`Oneshot::pull`].
pub struct Pull<T> {
  oneshot: Oneshot<T>,
}

impl<T: Send> Promise for Pull<T> {
  type Output = Option<T>;

  #[inline]
  fn poll(&mut self) -> Poll<Option<T>> {
    self.oneshot.poll_pull()
  }
}

#[inline]
fn wake_all(wakers: Vec<Waker>) {
  for mut waker in wakers {
    waker.wakeup();
  }
}
