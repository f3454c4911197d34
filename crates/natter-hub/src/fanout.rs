//! Pub/sub fan-out: publish persisted messages to the broker, and deliver
//! what the broker hands back to the connections this process holds.
//!
//! The engine keeps one listener task per conversation that has at least one
//! local connection attached. The listener's broker subscription exists
//! before [`FanoutEngine::attach`] returns, and each connection is reached
//! through exactly one listener, so a device sees every envelope once.
//!
//! It also follows a control channel per locally connected user. A
//! membership notice on it attaches that user's local connections to the
//! named conversation, so conversations created through another process
//! reach connections held here.

use std::{
  collections::{HashMap, HashSet, hash_map::Entry},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::{StreamExt as _, stream::BoxStream};
use natter_core::{
  ConversationId, UserId,
  message::Message,
  store::ChatStore,
  wire::{Envelope, MembershipNotice, OutboundFrame},
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
  Error, Result,
  broker::{Broker, PayloadStream, channel_name, user_channel},
  registry::{ConnectionHandle, ConnectionRegistry},
};

struct LocalSubscription {
  handles:  HashSet<Uuid>,
  listener: JoinHandle<()>,
}

#[derive(Default)]
struct Subscriptions {
  conversations: HashMap<ConversationId, LocalSubscription>,
  users:         HashMap<UserId, LocalSubscription>,
}

/// Remove `handle` from every entry, aborting listeners left with no handle.
fn release<K: std::fmt::Display>(
  map: &mut HashMap<K, LocalSubscription>,
  handle: Uuid,
  what: &str,
) {
  map.retain(|key, sub| {
    sub.handles.remove(&handle);
    if sub.handles.is_empty() {
      sub.listener.abort();
      tracing::debug!(channel = %key, kind = what, "unsubscribed");
      false
    } else {
      true
    }
  });
}

pub struct FanoutEngine<S, B> {
  broker:        Arc<B>,
  store:         Arc<S>,
  registry:      Arc<ConnectionRegistry>,
  subscriptions: Arc<Mutex<Subscriptions>>,
}

impl<S, B> Clone for FanoutEngine<S, B> {
  fn clone(&self) -> Self {
    Self {
      broker:        self.broker.clone(),
      store:         self.store.clone(),
      registry:      self.registry.clone(),
      subscriptions: self.subscriptions.clone(),
    }
  }
}

impl<S, B> FanoutEngine<S, B>
where
  S: ChatStore + 'static,
  B: Broker,
{
  /// Ping the broker and build the engine. A broker that cannot be reached
  /// here is fatal to the caller.
  pub async fn start(
    broker: Arc<B>,
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
  ) -> Result<Self> {
    broker.ping().await?;
    tracing::info!("fan-out engine started");
    Ok(Self {
      broker,
      store,
      registry,
      subscriptions: Arc::new(Mutex::new(Subscriptions::default())),
    })
  }

  fn subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
    self
      .subscriptions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  // ─── Publish side ────────────────────────────────────────────────────────

  /// Broadcast a persisted message on its conversation's channel.
  pub async fn publish(&self, message: &Message) -> Result<()> {
    let payload = Envelope::from(message).to_json()?;
    let channel = channel_name(message.conversation_id);
    self.broker.publish(&channel, payload).await?;
    tracing::debug!(
      conversation = %message.conversation_id,
      message = %message.id,
      "published",
    );
    Ok(())
  }

  /// The envelopes published on `conversation` from now on. Payloads that do
  /// not decode, or that name another conversation, are skipped.
  ///
  /// Each call opens a fresh broker subscription.
  pub async fn subscribe_conversation(
    &self,
    conversation: ConversationId,
  ) -> Result<BoxStream<'static, Envelope>> {
    let payloads = self.broker.subscribe(&channel_name(conversation)).await?;
    Ok(
      payloads
        .filter_map(move |raw| async move {
          match Envelope::from_json(&raw) {
            Ok(env) if env.conversation_id == conversation => Some(env),
            Ok(env) => {
              tracing::warn!(
                conversation = %conversation,
                got = %env.conversation_id,
                "envelope on wrong channel; skipped",
              );
              None
            }
            Err(e) => {
              tracing::warn!(conversation = %conversation, error = %e, "undecodable payload; skipped");
              None
            }
          }
        })
        .boxed(),
    )
  }

  // ─── Local interest ──────────────────────────────────────────────────────

  /// Record that `handle` wants live events for `conversation`, starting a
  /// listener if this is the first local interest. Membership is the
  /// caller's concern.
  pub async fn attach(&self, handle: ConnectionHandle, conversation: ConversationId) -> Result<()> {
    if let Some(sub) = self.subscriptions().conversations.get_mut(&conversation) {
      sub.handles.insert(handle.id);
      return Ok(());
    }

    // Subscribe outside the lock; another attach may win the race, in which
    // case our stream is dropped unused.
    let stream = self.subscribe_conversation(conversation).await?;

    match self.subscriptions().conversations.entry(conversation) {
      Entry::Occupied(mut e) => {
        e.get_mut().handles.insert(handle.id);
      }
      Entry::Vacant(e) => {
        let listener = tokio::spawn(self.clone().listen(conversation, stream));
        e.insert(LocalSubscription { handles: HashSet::from([handle.id]), listener });
        tracing::debug!(conversation = %conversation, "subscribed");
      }
    }
    Ok(())
  }

  /// Drop `handle`'s interest in one conversation.
  pub fn detach(&self, handle: Uuid, conversation: ConversationId) {
    let mut subs = self.subscriptions();
    if let Entry::Occupied(mut e) = subs.conversations.entry(conversation) {
      e.get_mut().handles.remove(&handle);
      if e.get().handles.is_empty() {
        e.remove().listener.abort();
        tracing::debug!(conversation = %conversation, "unsubscribed");
      }
    }
  }

  /// Drop `handle`'s interest everywhere. Conversations and users left with
  /// no local connection are unsubscribed.
  pub fn detach_all(&self, handle: Uuid) {
    let mut subs = self.subscriptions();
    release(&mut subs.conversations, handle, "conversation");
    release(&mut subs.users, handle, "user");
  }

  pub fn is_subscribed(&self, conversation: ConversationId) -> bool {
    self.subscriptions().conversations.contains_key(&conversation)
  }

  pub fn is_following(&self, user: UserId) -> bool {
    self.subscriptions().users.contains_key(&user)
  }

  /// Number of conversations with a running listener.
  pub fn subscription_count(&self) -> usize { self.subscriptions().conversations.len() }

  /// Abort every listener, releasing all broker subscriptions.
  pub fn shutdown(&self) {
    let mut subs = self.subscriptions();
    let conversations = subs.conversations.len();
    let subs = &mut *subs;
    for sub in subs.conversations.drain().map(|(_, s)| s).chain(subs.users.drain().map(|(_, s)| s)) {
      sub.listener.abort();
    }
    tracing::info!(subscriptions = conversations, "fan-out engine stopped");
  }

  // ─── Membership notices ──────────────────────────────────────────────────

  /// Follow the control channel of `handle`'s user, starting its listener
  /// if this is the user's first local connection. Call before reading the
  /// user's conversations so a conversation created in between is not
  /// missed.
  pub async fn follow_user(&self, handle: ConnectionHandle) -> Result<()> {
    let user = handle.user_id;
    if let Some(sub) = self.subscriptions().users.get_mut(&user) {
      sub.handles.insert(handle.id);
      return Ok(());
    }

    let stream = self.broker.subscribe(&user_channel(user)).await?;

    match self.subscriptions().users.entry(user) {
      Entry::Occupied(mut e) => {
        e.get_mut().handles.insert(handle.id);
      }
      Entry::Vacant(e) => {
        let listener = tokio::spawn(self.clone().listen_user(user, stream));
        e.insert(LocalSubscription { handles: HashSet::from([handle.id]), listener });
        tracing::debug!(user = %user, "following user channel");
      }
    }
    Ok(())
  }

  /// Tell every process that `user` now belongs to `conversation`.
  pub async fn notify_member(&self, user: UserId, conversation: ConversationId) -> Result<()> {
    let payload = MembershipNotice { conversation_id: conversation }.to_json()?;
    self.broker.publish(&user_channel(user), payload).await
  }

  async fn listen_user(self, user: UserId, mut stream: PayloadStream) {
    while let Some(raw) = stream.next().await {
      let notice = match MembershipNotice::from_json(&raw) {
        Ok(notice) => notice,
        Err(e) => {
          tracing::warn!(user = %user, error = %e, "undecodable membership notice; skipped");
          continue;
        }
      };
      self.join_local(user, notice.conversation_id).await;
    }
    tracing::debug!(user = %user, "user listener finished");
  }

  /// Attach every local connection of `user` to `conversation`, after
  /// confirming the membership with the store.
  async fn join_local(&self, user: UserId, conversation: ConversationId) {
    match self.store.is_member(user, conversation).await {
      Ok(true) => {}
      Ok(false) => {
        tracing::warn!(user = %user, conversation = %conversation, "notice for non-member ignored");
        return;
      }
      Err(e) => {
        tracing::warn!(user = %user, conversation = %conversation, error = %e, "membership check failed");
        return;
      }
    }

    for conn in self.registry.lookup_all(user) {
      if let Err(e) = self.attach(conn.handle(), conversation).await {
        tracing::warn!(user = %user, conversation = %conversation, error = %e, "could not subscribe");
      }
    }
  }

  // ─── Delivery side ───────────────────────────────────────────────────────

  async fn listen(self, conversation: ConversationId, mut stream: BoxStream<'static, Envelope>) {
    while let Some(env) = stream.next().await {
      self.deliver(env).await;
    }
    tracing::debug!(conversation = %conversation, "listener finished");
  }

  /// Write `env` to every local connection of every current member of its
  /// conversation. A connection whose queue is closed is unregistered and
  /// not retried. Returns the number of connections written to.
  pub async fn deliver(&self, env: Envelope) -> usize {
    let members = match self.store.list_members(env.conversation_id).await {
      Ok(members) => members,
      Err(e) => {
        tracing::warn!(
          conversation = %env.conversation_id,
          message = %env.message_id,
          error = %e,
          "member lookup failed; live delivery skipped",
        );
        return 0;
      }
    };

    let mut delivered = 0;
    for member in members {
      for conn in self.registry.lookup_all(member) {
        match conn.deliver(OutboundFrame::Message(env.clone())) {
          Ok(()) => delivered += 1,
          Err(Error::ConnectionLost(id)) => {
            tracing::debug!(connection = %id, user = %member, "connection lost during delivery");
            let handle = conn.handle();
            self.registry.unregister(&handle);
            self.detach_all(handle.id);
          }
          Err(e) => {
            tracing::warn!(user = %member, error = %e, "delivery failed");
          }
        }
      }
    }
    delivered
  }
}
