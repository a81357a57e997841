//! Message handles carried by the call spine's streams.

use bitflags::bitflags;

bitflags! {
  /// Per-message transport hints.
  #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
  pub struct MessageFlags: u32 {
    /// The payload is compressed.
    const COMPRESSED = 1 << 0;
    /// The payload must not be compressed further down the stack.
    const NO_COMPRESS = 1 << 1;
    /// The message duplicates an earlier send and may be coalesced.
    const DUPLICATED = 1 << 2;
  }
}

/// A move-only handle to one message payload and its flags.
#[derive(Debug, Default)]
pub struct Message {
  payload: Vec<u8>,
  flags: MessageFlags,
}

impl Message {
  /// Creates a message from a payload and flags.
  #[inline]
  pub fn new(payload: Vec<u8>, flags: MessageFlags) -> Self {
    Self { payload, flags }
  }

  /// Returns the payload bytes.
  #[inline]
  pub fn payload(&self) -> &[u8] {
    &self.payload
  }

  /// Returns the per-message flags.
  #[inline]
  pub const fn flags(&self) -> MessageFlags {
    self.flags
  }

  /// Consumes the handle, returning the payload.
  #[inline]
  pub fn into_payload(self) -> Vec<u8> {
    self.payload
  }
}
