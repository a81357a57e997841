//! Call composition on top of parties.

mod message;
mod metadata;
mod spine;

pub use self::message::Message;
pub use self::message::MessageFlags;
pub use self::metadata::ClientMetadata;
pub use self::metadata::ServerMetadata;
pub use self::metadata::ServerTrailingMetadata;
pub use self::metadata::StatusCode;
pub use self::spine::CallHandler;
pub use self::spine::CallInitiator;
pub use self::spine::CallPair;
pub use self::spine::UnstartedCallHandler;
pub use self::spine::forward_call;
pub use self::spine::make_call_pair;
