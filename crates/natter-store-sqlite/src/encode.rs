//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond precision
//! and a `Z` suffix, so string order equals time order and `>` comparisons in
//! SQL are meaningful.

use chrono::{DateTime, SecondsFormat, Utc};
use natter_core::{
  ConversationId, MessageId, UserId,
  conversation::{Conversation, ConversationKind},
  message::Message,
  user::User,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// The current instant, truncated to what survives a round-trip through
/// [`encode_dt`].
pub fn now() -> DateTime<Utc> {
  let now = Utc::now();
  decode_dt(&encode_dt(now)).unwrap_or(now)
}

// ─── ConversationKind ─────────────────────────────────────────────────────────

pub fn encode_kind(k: ConversationKind) -> &'static str {
  match k {
    ConversationKind::Direct => "direct",
    ConversationKind::Group => "group",
  }
}

pub fn decode_kind(s: &str) -> Result<ConversationKind> {
  match s {
    "direct" => Ok(ConversationKind::Direct),
    "group" => Ok(ConversationKind::Group),
    other => Err(Error::UnknownKind(other.to_owned())),
  }
}

// ─── Raw row types ────────────────────────────────────────────────────────────

/// A `messages` row as read from SQLite, before timestamp decoding.
pub struct RawMessage {
  pub id:              i64,
  pub conversation_id: i64,
  pub sender_id:       i64,
  pub content:         String,
  pub created_at:      String,
}

impl RawMessage {
  pub const COLUMNS: &'static str = "id, conversation_id, sender_id, content, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      conversation_id: row.get(1)?,
      sender_id:       row.get(2)?,
      content:         row.get(3)?,
      created_at:      row.get(4)?,
    })
  }

  pub fn into_message(self) -> Result<Message> {
    Ok(Message {
      id:              MessageId(self.id),
      conversation_id: ConversationId(self.conversation_id),
      sender_id:       UserId(self.sender_id),
      content:         self.content,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

/// A `users` row, minus the password hash.
pub struct RawUser {
  pub id:         i64,
  pub email:      String,
  pub first_name: String,
  pub last_name:  String,
  pub is_online:  bool,
  pub last_seen:  Option<String>,
}

impl RawUser {
  pub const COLUMNS: &'static str = "id, email, first_name, last_name, is_online, last_seen";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      email:      row.get(1)?,
      first_name: row.get(2)?,
      last_name:  row.get(3)?,
      is_online:  row.get(4)?,
      last_seen:  row.get(5)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:         UserId(self.id),
      email:      self.email,
      first_name: self.first_name,
      last_name:  self.last_name,
      is_online:  self.is_online,
      last_seen:  self.last_seen.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// A `conversations` row joined with its member ids.
pub struct RawConversation {
  pub id:         i64,
  pub kind:       String,
  pub name:       Option<String>,
  pub created_at: String,
  pub members:    Vec<i64>,
}

impl RawConversation {
  pub fn into_conversation(self) -> Result<Conversation> {
    Ok(Conversation {
      id:         ConversationId(self.id),
      kind:       decode_kind(&self.kind)?,
      name:       self.name,
      created_at: decode_dt(&self.created_at)?,
      members:    self.members.into_iter().map(UserId).collect(),
    })
  }
}
