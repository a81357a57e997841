//! Lifecycle and scheduling synchronization primitives.

mod dual_ref;
mod party_sync;

pub use self::dual_ref::DualArc;
pub use self::dual_ref::DualRefCount;
pub use self::dual_ref::DualRefCounted;
pub use self::dual_ref::WeakDualArc;
pub use self::party_sync::PartySync;
pub use self::party_sync::PartySyncUsingAtomics;
pub use self::party_sync::PartySyncUsingMutex;
