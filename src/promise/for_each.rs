//! Stream iteration over the poll contract.

use crate::promise::Pipe;
use crate::promise::Poll;
use crate::promise::Promise;

/// Applies a fallible action to every value pulled from a pipe.
///
/// Resolves `Ok(())` when the pipe closes and drains, or with the first
/// error produced by an action. At most one action is in flight at a time;
/// the next value is not pulled until the previous action resolved.
pub struct ForEach<T, F, A> {
  pipe: Pipe<T>,
  action: F,
  active: Option<A>,
}

/// Creates a for-each loop over `pipe`.
#[inline]
pub fn for_each<T, F, A, E>(pipe: Pipe<T>, action: F) -> ForEach<T, F, A>
where
  T: Send,
  F: FnMut(T) -> A,
  A: Promise<Output = Result<(), E>>,
{
  ForEach {
    pipe,
    action,
    active: None,
  }
}

impl<T, F, A, E> Promise for ForEach<T, F, A>
where
  T: Send,
  F: FnMut(T) -> A,
  A: Promise<Output = Result<(), E>>,
{
  type Output = Result<(), E>;

  fn poll(&mut self) -> Poll<Self::Output> {
    loop {
      if let Some(active) = &mut self.active {
        match active.poll() {
          Poll::Ready(Ok(())) => self.active = None,
          Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
          Poll::Pending => return Poll::Pending,
        }
      }

      match self.pipe.poll_next() {
        Poll::Ready(Some(value)) => self.active = Some((self.action)(value)),
        Poll::Ready(None) => return Poll::Ready(Ok(())),
        Poll::Pending => return Poll::Pending,
      }
    }
  }
}
