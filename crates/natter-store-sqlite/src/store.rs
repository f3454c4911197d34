//! [`SqliteStore`] — the SQLite implementation of [`ChatStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;

use natter_core::{
  ConversationId, MessageId, UserId,
  conversation::{Conversation, NewConversation},
  message::{HistoryQuery, Message, NewMessage},
  store::ChatStore,
  user::{NewUser, PresenceState, User},
};

use crate::{
  Result,
  encode::{RawConversation, RawMessage, RawUser, encode_dt, encode_kind, now},
  schema::SCHEMA,
};

/// Rows returned by `list_messages` when the caller gives no limit.
const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Upper bound on rows returned by one `list_messages` call.
const MAX_HISTORY_LIMIT: usize = 500;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Natter chat store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

fn members_of(conn: &rusqlite::Connection, conversation: i64) -> rusqlite::Result<Vec<i64>> {
  let mut stmt = conn.prepare_cached(
    "SELECT user_id FROM conversation_members WHERE conversation_id = ?1 ORDER BY user_id",
  )?;
  stmt
    .query_map(rusqlite::params![conversation], |r| r.get(0))?
    .collect()
}

// ─── ChatStore impl ──────────────────────────────────────────────────────────

impl ChatStore for SqliteStore {
  type Error = crate::Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn add_user(&self, input: NewUser) -> Result<User> {
    let NewUser { email, first_name, last_name, password_hash } = input;
    let (e, f, l) = (email.clone(), first_name.clone(), last_name.clone());

    let id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (email, first_name, last_name, password_hash)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![e, f, l, password_hash],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(User {
      id: UserId(id),
      email,
      first_name,
      last_name,
      is_online: false,
      last_seen: None,
    })
  }

  async fn get_user(&self, id: UserId) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", RawUser::COLUMNS);
        Ok(conn.query_row(&sql, rusqlite::params![id.0], RawUser::from_row).optional()?)
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  async fn credentials(&self, email: &str) -> Result<Option<(UserId, String)>> {
    let email = email.to_owned();

    let row: Option<(i64, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, password_hash FROM users WHERE email = ?1",
              rusqlite::params![email],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(row.map(|(id, hash)| (UserId(id), hash)))
  }

  async fn set_presence(&self, state: PresenceState) -> Result<()> {
    let last_seen = state.last_seen.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE users SET is_online = ?2, last_seen = COALESCE(?3, last_seen)
           WHERE id = ?1",
          rusqlite::params![state.user_id.0, state.is_online, last_seen],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Conversations & membership ────────────────────────────────────────────

  async fn create_conversation(&self, input: NewConversation) -> Result<Conversation> {
    let created_at = now();
    let at_str     = encode_dt(created_at);
    let kind_str   = encode_kind(input.kind).to_owned();
    let name       = input.name.clone();
    let members: Vec<i64> = input.members().iter().map(|m| m.0).collect();
    let member_rows = members.clone();

    // Conversation and membership commit together or not at all.
    let id: i64 = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO conversations (kind, name, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![kind_str, name, at_str],
        )?;
        let id = tx.last_insert_rowid();
        {
          let mut stmt = tx.prepare(
            "INSERT INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
          )?;
          for user in &member_rows {
            stmt.execute(rusqlite::params![id, user])?;
          }
        }
        tx.commit()?;
        Ok(id)
      })
      .await?;

    Ok(Conversation {
      id: ConversationId(id),
      kind: input.kind,
      name: input.name,
      created_at,
      members: members.into_iter().map(UserId).collect(),
    })
  }

  async fn list_conversations(&self, user: UserId) -> Result<Vec<Conversation>> {
    let raws: Vec<RawConversation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT c.id, c.kind, c.name, c.created_at
           FROM conversations c
           JOIN conversation_members cm ON cm.conversation_id = c.id
           WHERE cm.user_id = ?1
           ORDER BY c.id",
        )?;
        let heads = stmt
          .query_map(rusqlite::params![user.0], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<(i64, String, Option<String>, String)>>>()?;

        let mut out = Vec::with_capacity(heads.len());
        for (id, kind, name, created_at) in heads {
          let members = members_of(conn, id)?;
          out.push(RawConversation { id, kind, name, created_at, members });
        }
        Ok(out)
      })
      .await?;

    raws.into_iter().map(RawConversation::into_conversation).collect()
  }

  async fn list_members(&self, conversation: ConversationId) -> Result<Vec<UserId>> {
    let ids = self
      .conn
      .call(move |conn| Ok(members_of(conn, conversation.0)?))
      .await?;
    Ok(ids.into_iter().map(UserId).collect())
  }

  async fn is_member(&self, user: UserId, conversation: ConversationId) -> Result<bool> {
    let found = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM conversation_members
               WHERE conversation_id = ?1 AND user_id = ?2",
              rusqlite::params![conversation.0, user.0],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(found)
  }

  // ── Messages ──────────────────────────────────────────────────────────────

  async fn persist_message(&self, input: NewMessage) -> Result<Message> {
    let created_at = now();
    let at_str     = encode_dt(created_at);
    let content    = input.content.clone();
    let conv       = input.conversation_id.0;
    let sender     = input.sender_id.0;

    // A single INSERT: either the row (with its id) exists afterwards or
    // nothing does.
    let id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO messages (conversation_id, sender_id, content, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![conv, sender, content, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Message {
      id: MessageId(id),
      conversation_id: input.conversation_id,
      sender_id: input.sender_id,
      content: input.content,
      created_at,
    })
  }

  async fn list_messages(
    &self,
    conversation: ConversationId,
    query:        HistoryQuery,
  ) -> Result<Vec<Message>> {
    let limit  = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT) as i64;
    let before = query.before.map(|m| m.0);

    let raws: Vec<RawMessage> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM messages
           WHERE conversation_id = ?1 AND (?2 IS NULL OR id < ?2)
           ORDER BY id DESC
           LIMIT ?3",
          RawMessage::COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![conversation.0, before, limit], RawMessage::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMessage::into_message).collect()
  }

  async fn count_unread(&self, conversation: ConversationId, user: UserId) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*)
           FROM messages m
           JOIN conversation_members cm
             ON cm.conversation_id = m.conversation_id AND cm.user_id = ?2
           WHERE m.conversation_id = ?1
             AND m.sender_id != ?2
             AND m.id > COALESCE(cm.last_read_id, 0)",
          rusqlite::params![conversation.0, user.0],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(count.max(0) as u64)
  }

  async fn mark_read(&self, conversation: ConversationId, user: UserId) -> Result<()> {
    let at_str = encode_dt(now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE conversation_members
           SET last_read_id = COALESCE(
                 (SELECT MAX(id) FROM messages WHERE conversation_id = ?1),
                 last_read_id
               ),
               last_read_at = ?3
           WHERE conversation_id = ?1 AND user_id = ?2",
          rusqlite::params![conversation.0, user.0, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn sender_ids(&self) -> Result<Vec<UserId>> {
    let ids: Vec<i64> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT sender_id FROM messages ORDER BY id")?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(ids.into_iter().map(UserId).collect())
  }
}
