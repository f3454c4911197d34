//! Integer identifiers.
//!
//! All three are opaque to the core: they are assigned by the storage
//! collaborator and only ever compared, hashed, and echoed back.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl From<i64> for $name {
      fn from(raw: i64) -> Self { Self(raw) }
    }
  };
}

id_type!(
  /// Identity bound to a request by the authentication collaborator.
  UserId
);
id_type!(
  /// A conversation; also the key of its broker channel.
  ConversationId
);
id_type!(
  /// Server-assigned on persist.
  MessageId
);
