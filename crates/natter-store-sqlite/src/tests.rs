//! Integration tests for `SqliteStore` against an in-memory database.

use natter_core::{
  ConversationId, UserId,
  conversation::{ConversationKind, NewConversation},
  message::{HistoryQuery, NewMessage},
  store::ChatStore,
  user::{NewUser, PresenceState},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn user(s: &SqliteStore, name: &str) -> UserId {
  s.add_user(NewUser {
    email:         format!("{name}@example.com"),
    first_name:    name.into(),
    last_name:     "Test".into(),
    password_hash: "not-a-real-hash".into(),
  })
  .await
  .unwrap()
  .id
}

async fn conversation(s: &SqliteStore, members: &[UserId]) -> ConversationId {
  let input =
    NewConversation::new(ConversationKind::Group, Some("test".into()), members.iter().copied())
      .unwrap();
  s.create_conversation(input).await.unwrap().id
}

async fn send(s: &SqliteStore, conv: ConversationId, from: UserId, text: &str) {
  s.persist_message(NewMessage::new(conv, from, text).unwrap())
    .await
    .unwrap();
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_user() {
  let s = store().await;
  let id = user(&s, "alice").await;

  let fetched = s.get_user(id).await.unwrap().unwrap();
  assert_eq!(fetched.email, "alice@example.com");
  assert!(!fetched.is_online);
  assert!(fetched.last_seen.is_none());
}

#[tokio::test]
async fn get_user_missing_returns_none() {
  let s = store().await;
  assert!(s.get_user(UserId(999)).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
  let s = store().await;
  user(&s, "alice").await;
  let again = s
    .add_user(NewUser {
      email:         "alice@example.com".into(),
      first_name:    "Other".into(),
      last_name:     "Alice".into(),
      password_hash: "x".into(),
    })
    .await;
  assert!(again.is_err());
}

#[tokio::test]
async fn credentials_lookup() {
  let s = store().await;
  let id = user(&s, "alice").await;

  let (found, hash) = s.credentials("alice@example.com").await.unwrap().unwrap();
  assert_eq!(found, id);
  assert_eq!(hash, "not-a-real-hash");
  assert!(s.credentials("nobody@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn presence_is_persisted_and_last_seen_sticks() {
  let s = store().await;
  let id = user(&s, "alice").await;

  s.set_presence(PresenceState::online(id)).await.unwrap();
  assert!(s.get_user(id).await.unwrap().unwrap().is_online);

  let at = chrono::Utc::now();
  s.set_presence(PresenceState::offline(id, at)).await.unwrap();
  let u = s.get_user(id).await.unwrap().unwrap();
  assert!(!u.is_online);
  let seen = u.last_seen.unwrap();

  // Going online again keeps the previous last_seen.
  s.set_presence(PresenceState::online(id)).await.unwrap();
  let u = s.get_user(id).await.unwrap().unwrap();
  assert!(u.is_online);
  assert_eq!(u.last_seen, Some(seen));
}

// ─── Conversations & membership ──────────────────────────────────────────────

#[tokio::test]
async fn create_conversation_records_members() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let c = user(&s, "carol").await;
  let conv = conversation(&s, &[a, b]).await;

  assert!(s.is_member(a, conv).await.unwrap());
  assert!(s.is_member(b, conv).await.unwrap());
  assert!(!s.is_member(c, conv).await.unwrap());
  assert_eq!(s.list_members(conv).await.unwrap(), vec![a, b]);
}

#[tokio::test]
async fn unknown_conversation_is_not_member_and_has_no_members() {
  let s = store().await;
  let a = user(&s, "alice").await;
  assert!(!s.is_member(a, ConversationId(42)).await.unwrap());
  assert!(s.list_members(ConversationId(42)).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_conversation_with_unknown_user_stores_nothing() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let input =
    NewConversation::new(ConversationKind::Direct, None, [a, UserId(9999)]).unwrap();

  assert!(s.create_conversation(input).await.is_err());
  assert!(s.list_conversations(a).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_conversations_only_returns_own() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let c = user(&s, "carol").await;
  let ab = conversation(&s, &[a, b]).await;
  let bc = conversation(&s, &[b, c]).await;

  let for_a: Vec<_> = s.list_conversations(a).await.unwrap().into_iter().map(|c| c.id).collect();
  assert_eq!(for_a, vec![ab]);

  let for_b = s.list_conversations(b).await.unwrap();
  assert_eq!(for_b.len(), 2);
  assert_eq!(for_b[1].id, bc);
  assert_eq!(for_b[1].members, vec![b, c]);
}

// ─── Messages ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn persisted_message_is_in_history() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let conv = conversation(&s, &[a]).await;

  let stored = s
    .persist_message(NewMessage::new(conv, a, "hi").unwrap())
    .await
    .unwrap();

  let history = s.list_messages(conv, HistoryQuery::default()).await.unwrap();
  assert_eq!(history, vec![stored]);
}

#[tokio::test]
async fn message_to_missing_conversation_is_not_stored() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let res = s
    .persist_message(NewMessage::new(ConversationId(77), a, "hi").unwrap())
    .await;
  assert!(res.is_err());
  assert!(s.sender_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn history_is_newest_first_and_paged() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let conv = conversation(&s, &[a]).await;
  for i in 0..5 {
    send(&s, conv, a, &format!("m{i}")).await;
  }

  let page = s
    .list_messages(conv, HistoryQuery { limit: Some(2), before: None })
    .await
    .unwrap();
  let texts: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
  assert_eq!(texts, ["m4", "m3"]);

  let next = s
    .list_messages(conv, HistoryQuery { limit: Some(10), before: Some(page[1].id) })
    .await
    .unwrap();
  let texts: Vec<_> = next.iter().map(|m| m.content.as_str()).collect();
  assert_eq!(texts, ["m2", "m1", "m0"]);
}

// ─── Unread counters ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unread_excludes_own_messages() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let conv = conversation(&s, &[a, b]).await;

  send(&s, conv, a, "hi").await;

  assert_eq!(s.count_unread(conv, b).await.unwrap(), 1);
  assert_eq!(s.count_unread(conv, a).await.unwrap(), 0);
}

#[tokio::test]
async fn mark_read_resets_and_new_messages_count_again() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let conv = conversation(&s, &[a, b]).await;

  send(&s, conv, a, "one").await;
  send(&s, conv, a, "two").await;
  assert_eq!(s.count_unread(conv, b).await.unwrap(), 2);

  s.mark_read(conv, b).await.unwrap();
  assert_eq!(s.count_unread(conv, b).await.unwrap(), 0);

  send(&s, conv, a, "three").await;
  assert_eq!(s.count_unread(conv, b).await.unwrap(), 1);
}

#[tokio::test]
async fn read_marker_follows_message_order_not_the_clock() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let conv = conversation(&s, &[a, b]).await;

  send(&s, conv, a, "one").await;
  s.mark_read(conv, b).await.unwrap();

  // Stamp the marker in the future, as a clock stepping backwards would.
  s.conn
    .call(move |conn| {
      conn.execute(
        "UPDATE conversation_members SET last_read_at = '2999-01-01T00:00:00.000000Z'
         WHERE conversation_id = ?1",
        rusqlite::params![conv.0],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  send(&s, conv, a, "two").await;
  assert_eq!(s.count_unread(conv, b).await.unwrap(), 1);
}

#[tokio::test]
async fn mark_read_on_empty_conversation_counts_later_messages() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let conv = conversation(&s, &[a, b]).await;

  s.mark_read(conv, b).await.unwrap();
  send(&s, conv, a, "first").await;
  assert_eq!(s.count_unread(conv, b).await.unwrap(), 1);
}

#[tokio::test]
async fn unread_for_non_member_is_zero() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let c = user(&s, "carol").await;
  let conv = conversation(&s, &[a]).await;
  send(&s, conv, a, "secret").await;

  assert_eq!(s.count_unread(conv, c).await.unwrap(), 0);
}

#[tokio::test]
async fn sender_ids_has_one_entry_per_message() {
  let s = store().await;
  let a = user(&s, "alice").await;
  let b = user(&s, "bob").await;
  let conv = conversation(&s, &[a, b]).await;
  send(&s, conv, a, "1").await;
  send(&s, conv, b, "2").await;
  send(&s, conv, a, "3").await;

  assert_eq!(s.sender_ids().await.unwrap(), vec![a, b, a]);
}
