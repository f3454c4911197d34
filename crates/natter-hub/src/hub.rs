//! [`ChatHub`] — one per process, built at startup, drained at shutdown.

use std::{sync::Arc, time::Duration};

use natter_core::{
  ConversationId, UserId,
  conversation::{Conversation, ConversationKind, NewConversation},
  message::{HistoryQuery, Message, NewMessage},
  store::ChatStore,
  wire::{InboundFrame, OutboundFrame},
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::{
  Broker, Error, Result,
  fanout::FanoutEngine,
  harness::{self, ScanStrategy},
  membership::MembershipValidator,
  presence::PresenceTracker,
  registry::{ConnectionHandle, ConnectionRegistry},
};

/// Result of an accepted send. `pushed` is `false` when the message was
/// stored but the broker could not be reached.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
  pub message: Message,
  pub pushed:  bool,
}

pub struct ChatHub<S, B> {
  store:      Arc<S>,
  registry:   Arc<ConnectionRegistry>,
  presence:   Arc<PresenceTracker>,
  membership: MembershipValidator<S>,
  fanout:     FanoutEngine<S, B>,
  shutdown:   watch::Sender<bool>,
}

impl<S, B> ChatHub<S, B>
where
  S: ChatStore + 'static,
  B: Broker,
{
  /// Wire the hub together and start its background presence writer.
  /// Fails if the broker does not answer.
  pub async fn start(store: Arc<S>, broker: Arc<B>) -> Result<Self> {
    let (presence, mut updates) = PresenceTracker::with_updates();
    let presence = Arc::new(presence);
    let registry = Arc::new(ConnectionRegistry::new(presence.clone()));
    let fanout = FanoutEngine::start(broker, store.clone(), registry.clone()).await?;

    let writer = store.clone();
    tokio::spawn(async move {
      while let Some(state) = updates.recv().await {
        if let Err(e) = writer.set_presence(state).await {
          tracing::warn!(user = %state.user_id, error = %e, "failed to persist presence");
        }
      }
    });

    Ok(Self {
      membership: MembershipValidator::new(store.clone()),
      store,
      registry,
      presence,
      fanout,
      shutdown: watch::Sender::new(false),
    })
  }

  // ─── Connections ─────────────────────────────────────────────────────────

  /// Register a live connection for `user` and subscribe it to every
  /// conversation they belong to.
  pub async fn connect(
    &self,
    user: UserId,
    tx: mpsc::Sender<OutboundFrame>,
  ) -> Result<ConnectionHandle> {
    if self.is_shutting_down() {
      return Err(Error::ShuttingDown);
    }

    let handle = self.registry.register(user, tx);

    // Follow first: a conversation created after the listing below still
    // reaches this connection through a membership notice.
    if let Err(e) = self.fanout.follow_user(handle).await {
      tracing::warn!(user = %user, error = %e, "could not follow user channel");
    }

    let conversations = match self.store.list_conversations(user).await {
      Ok(c) => c,
      Err(e) => {
        self.registry.unregister(&handle);
        self.fanout.detach_all(handle.id);
        return Err(Error::persistence(e));
      }
    };

    for conversation in &conversations {
      if let Err(e) = self.fanout.attach(handle, conversation.id).await {
        tracing::warn!(
          user = %user,
          conversation = %conversation.id,
          error = %e,
          "could not subscribe; live delivery unavailable",
        );
      }
    }

    tracing::info!(
      connection = %handle.id,
      user = %user,
      conversations = conversations.len(),
      "connected",
    );
    Ok(handle)
  }

  /// Subscribe a connection to one more conversation, after checking the
  /// connection's user belongs to it.
  pub async fn subscribe(&self, handle: &ConnectionHandle, conversation: ConversationId) -> Result<()> {
    self.membership.authorize(handle.user_id, conversation).await?;
    self.fanout.attach(*handle, conversation).await
  }

  /// Idempotent.
  pub fn disconnect(&self, handle: &ConnectionHandle) {
    if self.registry.unregister(handle) {
      tracing::info!(connection = %handle.id, user = %handle.user_id, "disconnected");
    }
    self.fanout.detach_all(handle.id);
  }

  // ─── Messages ────────────────────────────────────────────────────────────

  /// Validate, authorize, persist, then publish. Publishing only happens
  /// after the message is stored; a broker failure still counts as a
  /// successful send.
  pub async fn send_message(&self, sender: UserId, frame: InboundFrame) -> Result<SendOutcome> {
    let input = NewMessage::new(frame.conversation_id, sender, frame.content)?;
    self.membership.authorize(sender, input.conversation_id).await?;

    let message = self
      .store
      .persist_message(input)
      .await
      .map_err(Error::persistence)?;

    let pushed = match self.fanout.publish(&message).await {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(
          conversation = %message.conversation_id,
          message = %message.id,
          error = %e,
          "live push skipped",
        );
        false
      }
    };

    Ok(SendOutcome { message, pushed })
  }

  /// Newest first.
  pub async fn history(
    &self,
    user: UserId,
    conversation: ConversationId,
    query: HistoryQuery,
  ) -> Result<Vec<Message>> {
    self.membership.authorize(user, conversation).await?;
    self
      .store
      .list_messages(conversation, query)
      .await
      .map_err(Error::persistence)
  }

  pub async fn unread_count(&self, user: UserId, conversation: ConversationId) -> Result<u64> {
    self.membership.authorize(user, conversation).await?;
    self
      .store
      .count_unread(conversation, user)
      .await
      .map_err(Error::persistence)
  }

  pub async fn mark_read(&self, user: UserId, conversation: ConversationId) -> Result<()> {
    self.membership.authorize(user, conversation).await?;
    self
      .store
      .mark_read(conversation, user)
      .await
      .map_err(Error::persistence)
  }

  // ─── Conversations ───────────────────────────────────────────────────────

  /// Create a conversation that always includes `creator`. Members already
  /// connected to this process are subscribed straight away; every member
  /// is also sent a membership notice so connections held by other
  /// processes subscribe too.
  pub async fn create_conversation(
    &self,
    creator: UserId,
    kind: ConversationKind,
    name: Option<String>,
    members: impl IntoIterator<Item = UserId>,
  ) -> Result<Conversation> {
    let input = NewConversation::new(kind, name, members.into_iter().chain([creator]))?;
    let conversation = self
      .store
      .create_conversation(input)
      .await
      .map_err(Error::persistence)?;

    for &member in &conversation.members {
      for conn in self.registry.lookup_all(member) {
        if let Err(e) = self.fanout.attach(conn.handle(), conversation.id).await {
          tracing::warn!(user = %member, conversation = %conversation.id, error = %e, "could not subscribe");
        }
      }
      if let Err(e) = self.fanout.notify_member(member, conversation.id).await {
        tracing::warn!(user = %member, conversation = %conversation.id, error = %e, "membership notice not sent");
      }
    }

    tracing::info!(conversation = %conversation.id, creator = %creator, "conversation created");
    Ok(conversation)
  }

  pub async fn conversations(&self, user: UserId) -> Result<Vec<Conversation>> {
    self
      .store
      .list_conversations(user)
      .await
      .map_err(Error::persistence)
  }

  // ─── Aggregation ─────────────────────────────────────────────────────────

  /// Distinct senders over the whole message history. The scan runs on the
  /// blocking pool.
  pub async fn distinct_senders(&self, strategy: ScanStrategy, workers: usize) -> Result<Vec<UserId>> {
    let ids = self.store.sender_ids().await.map_err(Error::persistence)?;
    let senders = tokio::task::spawn_blocking(move || {
      harness::distinct_senders(&ids, strategy, workers)
    })
    .await
    .map_err(|e| Error::Aggregation(e.to_string()))?;
    Ok(senders.into_iter().collect())
  }

  // ─── Accessors & lifecycle ───────────────────────────────────────────────

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn registry(&self) -> &ConnectionRegistry { &self.registry }

  pub fn presence(&self) -> &PresenceTracker { &self.presence }

  pub fn fanout(&self) -> &FanoutEngine<S, B> { &self.fanout }

  /// Flips to `true` once [`Self::drain`] starts. Connection tasks select
  /// on it and close their socket.
  pub fn shutdown_signal(&self) -> watch::Receiver<bool> { self.shutdown.subscribe() }

  pub fn is_shutting_down(&self) -> bool { *self.shutdown.borrow() }

  /// Refuse new connections, tell live ones to close, wait up to `timeout`
  /// for them to go, then release every broker subscription. Returns
  /// whether every connection closed in time.
  pub async fn drain(&self, timeout: Duration) -> bool {
    self.shutdown.send_replace(true);
    tracing::info!(connections = self.registry.len(), "draining");

    let drained = tokio::time::timeout(timeout, self.registry.wait_empty())
      .await
      .is_ok();
    if !drained {
      tracing::warn!(remaining = self.registry.len(), "drain timed out");
    }

    self.fanout.shutdown();
    drained
  }
}
