//! Frames exchanged over a live connection.
//!
//! Field names follow the published wire schema (`conversationID`,
//! `messageID`, ...), not Rust naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, Error, MessageId, Result, UserId, message::Message};

/// The only shape a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundFrame {
  #[serde(rename = "conversationID")]
  pub conversation_id: ConversationId,
  pub content:         String,
}

impl InboundFrame {
  /// Parse a raw frame; anything but the exact schema is malformed.
  pub fn parse(raw: &[u8]) -> Result<Self> {
    serde_json::from_slice(raw).map_err(|e| Error::MalformedFrame(e.to_string()))
  }
}

/// What every recipient receives for a delivered message. Also the payload
/// carried on the broker, JSON-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
  #[serde(rename = "messageID")]
  pub message_id:      MessageId,
  #[serde(rename = "conversationID")]
  pub conversation_id: ConversationId,
  #[serde(rename = "senderID")]
  pub sender_id:       UserId,
  pub content:         String,
  #[serde(rename = "createdAt")]
  pub created_at:      DateTime<Utc>,
}

impl From<&Message> for Envelope {
  fn from(m: &Message) -> Self {
    Self {
      message_id:      m.id,
      conversation_id: m.conversation_id,
      sender_id:       m.sender_id,
      content:         m.content.clone(),
      created_at:      m.created_at,
    }
  }
}

impl Envelope {
  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string(self)?) }

  pub fn from_json(raw: &str) -> Result<Self> { Ok(serde_json::from_str(raw)?) }
}

/// Broker payload telling every process that a user joined a conversation,
/// so connections it holds for that user can start receiving it. Never sent
/// to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipNotice {
  #[serde(rename = "conversationID")]
  pub conversation_id: ConversationId,
}

impl MembershipNotice {
  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string(self)?) }

  pub fn from_json(raw: &str) -> Result<Self> { Ok(serde_json::from_str(raw)?) }
}

/// A rejected send, reported back on the sender's own connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
  pub error:           String,
  #[serde(rename = "conversationID", skip_serializing_if = "Option::is_none")]
  pub conversation_id: Option<ConversationId>,
}

/// Anything the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
  Message(Envelope),
  Error(ErrorFrame),
}

impl OutboundFrame {
  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string(self)?) }
}
