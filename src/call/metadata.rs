//! Metadata handles exchanged across a call spine.
//!
//! The three metadata kinds are distinct move-only types so a handle cannot
//! be routed to the wrong pipe: client-initial, server-initial, and
//! server-trailing metadata each have their own type, and trailing metadata
//! additionally carries the call status.

// -----------------------------------------------------------------------------
// Status Code
// -----------------------------------------------------------------------------

/// Final status of a call, carried by [`ServerTrailingMetadata`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StatusCode {
  /// The call completed successfully.
  Ok,
  /// The call was cancelled, typically by the caller.
  Cancelled,
  /// The call failed for an unreported reason.
  Unknown,
  /// The call outlived its deadline.
  DeadlineExceeded,
  /// The called side is currently unreachable.
  Unavailable,
  /// An invariant was broken inside the call machinery.
  Internal,
}

impl StatusCode {
  /// Returns `true` for [`StatusCode::Ok`].
  #[inline]
  pub const fn is_ok(&self) -> bool {
    matches!(self, Self::Ok)
  }
}

impl std::fmt::Display for StatusCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name: &str = match self {
      Self::Ok => "OK",
      Self::Cancelled => "CANCELLED",
      Self::Unknown => "UNKNOWN",
      Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
      Self::Unavailable => "UNAVAILABLE",
      Self::Internal => "INTERNAL",
    };

    f.write_str(name)
  }
}

// -----------------------------------------------------------------------------
// Metadata
// -----------------------------------------------------------------------------

/// An ordered key/value header block.
///
/// Keys are matched case-sensitively; duplicate keys are preserved in
/// insertion order and [`get`] returns the first.
///
/// [`get`]: Metadata::get
#[derive(Debug, Default)]
struct Metadata {
  entries: Vec<(String, String)>,
}

impl Metadata {
  fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.entries.push((key.into(), value.into()));
  }

  fn get(&self, key: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|(entry, _)| entry == key)
      .map(|(_, value)| value.as_str())
  }

  fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .entries
      .iter()
      .map(|(key, value)| (key.as_str(), value.as_str()))
  }

  fn len(&self) -> usize {
    self.entries.len()
  }
}

macro_rules! metadata_handle {
  ($(#[$doc:meta])* $name:ident) => {
    $(#[$doc])*
    ///
    /// The handle is move-only: there is exactly one owner at any time.
    #[derive(Debug, Default)]
    pub struct $name {
      metadata: Metadata,
    }

    impl $name {
      /// Creates an empty header block.
      #[inline]
      pub fn new() -> Self {
        Self::default()
      }

      /// Appends a header, preserving insertion order.
      #[inline]
      pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.append(key, value);
      }

      /// Returns the first value under `key`, if any.
      #[inline]
      pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)
      }

      /// Iterates the headers in insertion order.
      #[inline]
      pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter()
      }

      /// Returns the number of headers.
      #[inline]
      pub fn len(&self) -> usize {
        self.metadata.len()
      }

      /// Returns `true` if the block holds no headers.
      #[inline]
      pub fn is_empty(&self) -> bool {
        self.metadata.len() == 0
      }
    }
  };
}

metadata_handle! {
  /// Headers sent by the client when the call starts.
  ClientMetadata
}

metadata_handle! {
  /// Headers sent by the server ahead of its first message.
  ServerMetadata
}

/// Headers sent by the server after its last message, carrying the final
/// call status.
///
/// The handle is move-only: there is exactly one owner at any time.
#[derive(Debug)]
pub struct ServerTrailingMetadata {
  metadata: Metadata,
  status: StatusCode,
}

impl ServerTrailingMetadata {
  /// Creates an empty trailing block with the given status.
  pub fn new(status: StatusCode) -> Self {
    Self {
      metadata: Metadata::default(),
      status,
    }
  }

  /// Returns the final call status.
  #[inline]
  pub const fn status(&self) -> StatusCode {
    self.status
  }

  /// Appends a header, preserving insertion order.
  #[inline]
  pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.metadata.append(key, value);
  }

  /// Returns the first value under `key`, if any.
  #[inline]
  pub fn get(&self, key: &str) -> Option<&str> {
    self.metadata.get(key)
  }

  /// Iterates the headers in insertion order.
  #[inline]
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.metadata.iter()
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_append_and_get() {
    let mut metadata: ClientMetadata = ClientMetadata::new();

    metadata.append("path", "/echo.Echo/UnaryEcho");
    metadata.append("authority", "localhost");

    assert_eq!(metadata.get("path"), Some("/echo.Echo/UnaryEcho"));
    assert_eq!(metadata.get("authority"), Some("localhost"));
    assert_eq!(metadata.get("missing"), None);
    assert_eq!(metadata.len(), 2);
  }

  #[test]
  fn test_duplicate_keys_keep_order() {
    let mut metadata: ServerMetadata = ServerMetadata::new();

    metadata.append("warning", "first");
    metadata.append("warning", "second");

    assert_eq!(metadata.get("warning"), Some("first"));

    let values: Vec<&str> = metadata.iter().map(|(_, value)| value).collect();
    assert_eq!(values, ["first", "second"]);
  }

  #[test]
  fn test_trailing_status() {
    let trailing: ServerTrailingMetadata = ServerTrailingMetadata::new(StatusCode::Ok);

    assert!(trailing.status().is_ok());
    assert_eq!(trailing.status().to_string(), "OK");

    let cancelled: ServerTrailingMetadata = ServerTrailingMetadata::new(StatusCode::Cancelled);

    assert!(!cancelled.status().is_ok());
  }
}
