//! Messages — the unit that is persisted once and then fanned out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, Error, MessageId, Result, UserId};

/// A stored message. Nothing on it changes after creation; read state lives
/// on the membership row, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub id:              MessageId,
  pub conversation_id: ConversationId,
  pub sender_id:       UserId,
  pub content:         String,
  /// Server-assigned timestamp.
  pub created_at:      DateTime<Utc>,
}

/// Input to [`crate::store::ChatStore::persist_message`].
/// `id` and `created_at` are always set by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
  pub conversation_id: ConversationId,
  pub sender_id:       UserId,
  pub content:         String,
}

impl NewMessage {
  /// Build a message, rejecting content that is empty after trimming.
  pub fn new(
    conversation_id: ConversationId,
    sender_id: UserId,
    content: impl Into<String>,
  ) -> Result<Self> {
    let content = content.into();
    if content.trim().is_empty() {
      return Err(Error::EmptyContent);
    }
    Ok(Self { conversation_id, sender_id, content })
  }
}

/// Parameters for [`crate::store::ChatStore::list_messages`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQuery {
  /// Maximum rows to return; the store applies its own default when `None`.
  pub limit:  Option<usize>,
  /// Only messages with an id strictly lower than this one.
  pub before: Option<MessageId>,
}
