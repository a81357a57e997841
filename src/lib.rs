//! Convoke - the concurrency core of an RPC runtime.
//!
//! # Overview
//!
//! Convoke provides the cooperative scheduling machinery every call and
//! channel in the runtime is built on: the [`Party`] activity scheduler,
//! the dual-refcount lifecycle primitive underneath it, and the call spine
//! that couples a handler-side and an initiator-side party into a
//! bidirectional, message-pumping call.
//!
//! # Core Guarantees
//!
//! - **Internal serialization**: any number of threads may spawn into or
//!   wake a party, but its participants never run concurrently with each
//!   other
//! - **Deterministic wake order**: the wakeups of one turn are polled in
//!   ascending slot order; wakeups landing mid-turn defer to the next turn
//! - **Exactly-once lifecycle**: a dual-refcounted object is orphaned
//!   exactly once when its last strong ref drops and destroyed exactly
//!   once when its last weak ref follows
//! - **Cooperative cancellation**: cancelling a party wakes every live
//!   participant once with the cancellation flag observable from its poll
//!
//! # Module Structure
//!
//! - [`sync`]: dual refcounting and the party state word
//! - [`party`]: the participant scheduler
//! - [`promise`]: the poll contract and its combinators
//! - [`call`]: metadata, messages, and the call spine
//! - [`arena`]: call-scoped allocation and capability storage
//! - [`engine`]: the clock/timer/thread-pool capability
//! - [`consts`]: limits and tuning values
//!
//! [`Party`]: crate::party::Party

pub mod arena;
pub mod call;
pub mod consts;
pub mod engine;
pub mod party;
pub mod promise;
pub mod sync;

mod error;
mod loom;

pub use crate::arena::ArenaRef;
pub use crate::call::CallHandler;
pub use crate::call::CallInitiator;
pub use crate::call::CallPair;
pub use crate::call::forward_call;
pub use crate::call::make_call_pair;
pub use crate::engine::EngineRef;
pub use crate::engine::EventEngine;
pub use crate::engine::TokioEngine;
pub use crate::party::BulkSpawner;
pub use crate::party::Party;
pub use crate::party::Waitable;
pub use crate::party::Waker;
pub use crate::promise::Poll;
pub use crate::promise::Promise;
pub use crate::sync::DualArc;
pub use crate::sync::DualRefCount;
pub use crate::sync::DualRefCounted;
pub use crate::sync::WeakDualArc;
