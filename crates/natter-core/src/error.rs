//! Error types for `natter-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed frame: {0}")]
  MalformedFrame(String),

  #[error("message content is empty")]
  EmptyContent,

  #[error("a conversation needs at least one member")]
  NoMembers,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
