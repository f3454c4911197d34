//! The `ChatStore` trait — the storage collaborator the chat core consumes.
//!
//! The trait is implemented by storage backends (e.g. `natter-store-sqlite`).
//! The hub and the server depend on this abstraction, not on any concrete
//! backend. Every method may fail with a backend error, which callers treat
//! as "storage unavailable".

use std::future::Future;

use crate::{
  ConversationId, UserId,
  conversation::{Conversation, NewConversation},
  message::{HistoryQuery, Message, NewMessage},
  user::{NewUser, PresenceState, User},
};

/// Abstraction over a Natter storage backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ChatStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Provision a user. Registration flows live outside the core; this is
  /// the operator path.
  fn add_user(
    &self,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// Retrieve a user by id. Returns `None` if not found.
  fn get_user(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// Look up the id and password hash for an email, for identity binding.
  fn credentials<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<(UserId, String)>, Self::Error>> + Send + 'a;

  /// Persist the latest presence transition for a user.
  fn set_presence(
    &self,
    state: PresenceState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Conversations & membership ────────────────────────────────────────

  /// Create a conversation and all of its membership rows atomically.
  fn create_conversation(
    &self,
    input: NewConversation,
  ) -> impl Future<Output = Result<Conversation, Self::Error>> + Send + '_;

  /// All conversations `user` is a member of, oldest first.
  fn list_conversations(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Vec<Conversation>, Self::Error>> + Send + '_;

  /// Member ids of a conversation. Empty if the conversation does not exist.
  fn list_members(
    &self,
    conversation: ConversationId,
  ) -> impl Future<Output = Result<Vec<UserId>, Self::Error>> + Send + '_;

  /// `false` both for non-members and for conversations that do not exist.
  fn is_member(
    &self,
    user: UserId,
    conversation: ConversationId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Messages ──────────────────────────────────────────────────────────

  /// Atomically record a message. On success the returned [`Message`] carries
  /// the server-assigned id and `created_at`; on failure nothing is stored.
  fn persist_message(
    &self,
    input: NewMessage,
  ) -> impl Future<Output = Result<Message, Self::Error>> + Send + '_;

  /// Message history for a conversation, newest first.
  fn list_messages(
    &self,
    conversation: ConversationId,
    query: HistoryQuery,
  ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send + '_;

  /// Messages in `conversation` newer than `user`'s read marker and not sent
  /// by `user`. Zero for non-members.
  fn count_unread(
    &self,
    conversation: ConversationId,
    user: UserId,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Move `user`'s read marker in `conversation` to now.
  fn mark_read(
    &self,
    conversation: ConversationId,
    user: UserId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The sender of every stored message, one entry per message.
  fn sender_ids(
    &self,
  ) -> impl Future<Output = Result<Vec<UserId>, Self::Error>> + Send + '_;
}
