//! Participant storage.
//!
//! A participant wraps a promise together with its completion callback.
//! Polling and delivery are split so the party can clear the poll scope
//! before running `on_done`: a completion callback is allowed to spawn into
//! the same party, which must not look like a nested poll.

use crate::promise::Poll;
use crate::promise::Promise;

/// A heterogeneous participant slot entry.
pub(crate) trait Participant: Send {
  /// Diagnostic name given at spawn time.
  fn name(&self) -> &'static str;

  /// Polls the wrapped promise under the installed poll scope.
  ///
  /// Returns `true` once the promise resolved; the result is buffered for
  /// [`deliver`].
  ///
  /// [`deliver`]: Self::deliver
  fn poll_step(&mut self) -> bool;

  /// Invokes the completion callback with the buffered result.
  ///
  /// Called with the poll scope cleared, exactly once, after `poll_step`
  /// returned `true`.
  fn deliver(&mut self);
}

pub(crate) struct ParticipantImpl<P, F>
where
  P: Promise,
{
  name: &'static str,
  promise: P,
  result: Option<P::Output>,
  on_done: Option<F>,
}

impl<P, F> ParticipantImpl<P, F>
where
  P: Promise,
  F: FnOnce(P::Output),
{
  #[inline]
  pub(crate) fn new(name: &'static str, promise: P, on_done: F) -> Self {
    Self {
      name,
      promise,
      result: None,
      on_done: Some(on_done),
    }
  }
}

impl<P, F> Participant for ParticipantImpl<P, F>
where
  P: Promise + Send,
  P::Output: Send,
  F: FnOnce(P::Output) + Send,
{
  #[inline]
  fn name(&self) -> &'static str {
    self.name
  }

  fn poll_step(&mut self) -> bool {
    match self.promise.poll() {
      Poll::Ready(value) => {
        self.result = Some(value);
        true
      }
      Poll::Pending => false,
    }
  }

  fn deliver(&mut self) {
    if let (Some(result), Some(on_done)) = (self.result.take(), self.on_done.take()) {
      on_done(result);
    }
  }
}
