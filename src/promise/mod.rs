//! The poll contract and the combinators built on it.
//!
//! Everything a party schedules is a [`Promise`]: a restartable state
//! machine with a single `poll` operation. The combinators in this module
//! compose promises into sequences ([`seq`], [`try_seq`]), branches
//! ([`if_then`]), and stream loops ([`for_each`]) without any underlying
//! async runtime; suspension happens only by returning [`Poll::Pending`]
//! and resumption only through captured wakers.

mod for_each;
mod latch;
mod pipe;
mod poll;
mod seq;
mod sleep;

pub use self::for_each::ForEach;
pub use self::for_each::for_each;
pub use self::latch::InterActivityLatch;
pub use self::latch::Wait;
pub use self::pipe::Next;
pub use self::pipe::Oneshot;
pub use self::pipe::Pipe;
pub use self::pipe::Pull;
pub use self::pipe::Push;
pub use self::poll::Poll;
pub use self::poll::Promise;
pub use self::seq::If;
pub use self::seq::Map;
pub use self::seq::Seq;
pub use self::seq::TrySeq;
pub use self::seq::if_then;
pub use self::seq::map;
pub use self::seq::seq;
pub use self::seq::try_seq;
pub use self::sleep::Sleep;
pub use self::sleep::sleep;
