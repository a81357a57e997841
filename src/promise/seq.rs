//! Sequencing combinators over the poll contract.
//!
//! These compose heterogeneous promise state machines without an async
//! runtime underneath: a [`Seq`] holds either its first stage or the stage
//! produced from the first stage's result, and polls whichever is current.

use crate::promise::Poll;
use crate::promise::Promise;

// -----------------------------------------------------------------------------
// Seq
// -----------------------------------------------------------------------------

enum SeqState<A, B> {
  First(A),
  Second(B),
}

/// Runs `first`, then the promise produced by feeding its result to `next`.
pub struct Seq<A, F, B> {
  state: SeqState<A, B>,
  next: Option<F>,
}

/// Creates a two-stage sequence. Nest calls for longer chains.
#[inline]
pub fn seq<A, F, B>(first: A, next: F) -> Seq<A, F, B>
where
  A: Promise,
  F: FnOnce(A::Output) -> B,
  B: Promise,
{
  Seq {
    state: SeqState::First(first),
    next: Some(next),
  }
}

impl<A, F, B> Promise for Seq<A, F, B>
where
  A: Promise,
  F: FnOnce(A::Output) -> B,
  B: Promise,
{
  type Output = B::Output;

  fn poll(&mut self) -> Poll<Self::Output> {
    loop {
      match &mut self.state {
        SeqState::First(first) => match first.poll() {
          Poll::Ready(value) => {
            let Some(next) = self.next.take() else {
              unreachable!("sequence stage resolved twice");
            };

            self.state = SeqState::Second(next(value));
          }
          Poll::Pending => return Poll::Pending,
        },
        SeqState::Second(second) => return second.poll(),
      }
    }
  }
}

// -----------------------------------------------------------------------------
// TrySeq
// -----------------------------------------------------------------------------

/// Runs `first`, then the promise produced from its success value.
///
/// An error from either stage resolves the whole sequence with that error;
/// the second stage is never constructed after a failure.
pub struct TrySeq<A, F, B> {
  state: SeqState<A, B>,
  next: Option<F>,
}

/// Creates a two-stage fallible sequence. Nest calls for longer chains.
#[inline]
pub fn try_seq<A, F, B, T, U, E>(first: A, next: F) -> TrySeq<A, F, B>
where
  A: Promise<Output = Result<T, E>>,
  F: FnOnce(T) -> B,
  B: Promise<Output = Result<U, E>>,
{
  TrySeq {
    state: SeqState::First(first),
    next: Some(next),
  }
}

impl<A, F, B, T, U, E> Promise for TrySeq<A, F, B>
where
  A: Promise<Output = Result<T, E>>,
  F: FnOnce(T) -> B,
  B: Promise<Output = Result<U, E>>,
{
  type Output = Result<U, E>;

  fn poll(&mut self) -> Poll<Self::Output> {
    loop {
      match &mut self.state {
        SeqState::First(first) => match first.poll() {
          Poll::Ready(Ok(value)) => {
            let Some(next) = self.next.take() else {
              unreachable!("sequence stage resolved twice");
            };

            self.state = SeqState::Second(next(value));
          }
          Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
          Poll::Pending => return Poll::Pending,
        },
        SeqState::Second(second) => return second.poll(),
      }
    }
  }
}

// -----------------------------------------------------------------------------
// If
// -----------------------------------------------------------------------------

/// One of two promise branches, chosen at construction time.
pub enum If<A, B> {
  /// The condition held.
  Then(A),
  /// The condition did not hold.
  Otherwise(B),
}

/// Selects a branch by `condition`; only the selected factory runs.
#[inline]
pub fn if_then<A, B, FA, FB>(condition: bool, then: FA, otherwise: FB) -> If<A, B>
where
  FA: FnOnce() -> A,
  FB: FnOnce() -> B,
  A: Promise,
  B: Promise<Output = A::Output>,
{
  if condition {
    If::Then(then())
  } else {
    If::Otherwise(otherwise())
  }
}

impl<A, B> Promise for If<A, B>
where
  A: Promise,
  B: Promise<Output = A::Output>,
{
  type Output = A::Output;

  #[inline]
  fn poll(&mut self) -> Poll<Self::Output> {
    match self {
      Self::Then(then) => then.poll(),
      Self::Otherwise(otherwise) => otherwise.poll(),
    }
  }
}

// -----------------------------------------------------------------------------
// Map
// -----------------------------------------------------------------------------

/// Applies a function to a promise's result.
pub struct Map<P, F> {
  promise: P,
  map: Option<F>,
}

/// Creates a mapped promise.
#[inline]
pub fn map<P, F, T>(promise: P, map: F) -> Map<P, F>
where
  P: Promise,
  F: FnOnce(P::Output) -> T,
{
  Map {
    promise,
    map: Some(map),
  }
}

impl<P, F, T> Promise for Map<P, F>
where
  P: Promise,
  F: FnOnce(P::Output) -> T,
{
  type Output = T;

  fn poll(&mut self) -> Poll<T> {
    match self.promise.poll() {
      Poll::Ready(value) => {
        let Some(map) = self.map.take() else {
          unreachable!("mapped promise resolved twice");
        };

        Poll::Ready(map(value))
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  fn drain<P: Promise>(mut promise: P) -> P::Output {
    loop {
      if let Poll::Ready(value) = promise.poll() {
        return value;
      }
    }
  }

  #[test]
  fn test_seq_threads_values() {
    let promise = seq(
      || Poll::Ready(2),
      |two: i32| move || Poll::Ready(two * 21),
    );

    assert_eq!(drain(promise), 42);
  }

  #[test]
  fn test_seq_waits_for_first_stage() {
    let mut countdown: i32 = 3;
    let mut promise = seq(
      move || {
        countdown -= 1;
        if countdown == 0 {
          Poll::Ready(1)
        } else {
          Poll::Pending
        }
      },
      |one: i32| move || Poll::Ready(one + 1),
    );

    assert_eq!(promise.poll(), Poll::Pending);
    assert_eq!(promise.poll(), Poll::Pending);
    assert_eq!(promise.poll(), Poll::Ready(2));
  }

  #[test]
  fn test_try_seq_short_circuits() {
    let promise = try_seq(
      || Poll::Ready(Err::<i32, &str>("boom")),
      |_value: i32| move || Poll::Ready(Ok::<i32, &str>(0)),
    );

    assert_eq!(drain(promise), Err("boom"));
  }

  #[test]
  fn test_try_seq_threads_success() {
    let promise = try_seq(
      || Poll::Ready(Ok::<i32, &str>(40)),
      |forty: i32| move || Poll::Ready(Ok::<i32, &str>(forty + 2)),
    );

    assert_eq!(drain(promise), Ok(42));
  }

  #[test]
  fn test_if_then_selects_branch() {
    let then = if_then(
      true,
      || || Poll::Ready(1),
      || || Poll::Ready(2),
    );
    let otherwise = if_then(
      false,
      || || Poll::Ready(1),
      || || Poll::Ready(2),
    );

    assert_eq!(drain(then), 1);
    assert_eq!(drain(otherwise), 2);
  }

  #[test]
  fn test_map_applies() {
    assert_eq!(drain(map(|| Poll::Ready(21), |v: i32| v * 2)), 42);
  }
}
