//! Error type for `natter-hub`.

use natter_core::{ConversationId, UserId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Non-members and unknown conversations look the same from here.
  #[error("user {user} may not access conversation {conversation}")]
  Forbidden {
    user:         UserId,
    conversation: ConversationId,
  },

  #[error("invalid request: {0}")]
  Validation(#[from] natter_core::Error),

  #[error("storage unavailable: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("broker unavailable: {0}")]
  BrokerUnavailable(String),

  #[error("connection {0} lost")]
  ConnectionLost(Uuid),

  #[error("shutting down")]
  ShuttingDown,

  #[error("aggregation worker failed: {0}")]
  Aggregation(String),
}

impl Error {
  pub fn persistence<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Persistence(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
