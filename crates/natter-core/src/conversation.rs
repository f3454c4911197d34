//! Conversations and their membership.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, Error, Result, UserId};

/// Whether a conversation is a one-to-one thread or a named group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
  #[default]
  Direct,
  Group,
}

/// A conversation envelope. Membership is stored separately and never
/// edited by the core once the conversation exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
  pub id:         ConversationId,
  pub kind:       ConversationKind,
  pub name:       Option<String>,
  pub created_at: DateTime<Utc>,
  pub members:    Vec<UserId>,
}

/// Input to [`crate::store::ChatStore::create_conversation`].
#[derive(Debug, Clone)]
pub struct NewConversation {
  pub kind:    ConversationKind,
  pub name:    Option<String>,
  /// Sorted and de-duplicated; never empty.
  members:     Vec<UserId>,
}

impl NewConversation {
  pub fn new(
    kind: ConversationKind,
    name: Option<String>,
    members: impl IntoIterator<Item = UserId>,
  ) -> Result<Self> {
    let members: Vec<UserId> =
      members.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    if members.is_empty() {
      return Err(Error::NoMembers);
    }
    Ok(Self { kind, name, members })
  }

  pub fn members(&self) -> &[UserId] { &self.members }
}
