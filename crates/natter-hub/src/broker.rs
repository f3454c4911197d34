//! The pub/sub backbone shared by every process serving the chat.
//!
//! Payloads are opaque strings (JSON-encoded envelopes) so any process can
//! decode what another published.

use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use futures_util::{StreamExt as _, stream::BoxStream};
use natter_core::{ConversationId, UserId};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::Result;

/// An endless-until-unsubscribed sequence of payloads for one channel.
pub type PayloadStream = BoxStream<'static, String>;

/// Broker channel for a conversation. Decimal ids keep names unique per
/// conversation.
pub fn channel_name(conversation: ConversationId) -> String {
  format!("conversation:{conversation}")
}

/// Per-user control channel carrying membership notices. The prefix keeps it
/// apart from conversation channels.
pub fn user_channel(user: UserId) -> String { format!("user:{user}") }

/// Abstraction over a pub/sub broker.
///
/// Failures are reported as [`crate::Error::BrokerUnavailable`].
pub trait Broker: Send + Sync + 'static {
  /// Checked once at startup; a failing broker stops the fan-out engine from
  /// starting.
  fn ping(&self) -> impl Future<Output = Result<()>> + Send + '_;

  /// Publish to every current subscriber of `channel`. Order is preserved
  /// per channel.
  fn publish<'a>(
    &'a self,
    channel: &'a str,
    payload: String,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Subscribe to `channel`. The subscription is live once this resolves;
  /// dropping the stream unsubscribes.
  fn subscribe<'a>(
    &'a self,
    channel: &'a str,
  ) -> impl Future<Output = Result<PayloadStream>> + Send + 'a;
}

// ─── In-memory broker ────────────────────────────────────────────────────────

/// A broker built on one `tokio::sync::broadcast` channel per name.
///
/// Clones share the channel table, so several hubs in one address space
/// behave like processes attached to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
  channels: Arc<DashMap<String, broadcast::Sender<String>>>,
  buffer:   usize,
}

impl MemoryBroker {
  /// `buffer` is the per-channel backlog a slow subscriber may fall behind
  /// by before it starts skipping events.
  pub fn new(buffer: usize) -> Self {
    Self {
      channels: Arc::new(DashMap::new()),
      buffer:   buffer.max(1),
    }
  }

  /// Number of subscribers currently attached to `channel`.
  pub fn subscriber_count(&self, channel: &str) -> usize {
    self
      .channels
      .get(channel)
      .map(|tx| tx.receiver_count())
      .unwrap_or(0)
  }
}

impl Default for MemoryBroker {
  fn default() -> Self { Self::new(256) }
}

impl Broker for MemoryBroker {
  async fn ping(&self) -> Result<()> { Ok(()) }

  async fn publish(&self, channel: &str, payload: String) -> Result<()> {
    let delivered = match self.channels.get(channel) {
      Some(tx) => tx.send(payload).is_ok(),
      None => return Ok(()),
    };
    if !delivered {
      // Nobody listens any more; forget the channel.
      self
        .channels
        .remove_if(channel, |_, tx| tx.receiver_count() == 0);
    }
    Ok(())
  }

  async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
    let rx = self
      .channels
      .entry(channel.to_owned())
      .or_insert_with(|| broadcast::channel(self.buffer).0)
      .subscribe();
    Ok(receiver_stream(rx, channel.to_owned()))
  }
}

fn receiver_stream(rx: broadcast::Receiver<String>, channel: String) -> PayloadStream {
  futures_util::stream::unfold((rx, channel), |(mut rx, channel)| async move {
    loop {
      match rx.recv().await {
        Ok(payload) => return Some((payload, (rx, channel))),
        Err(RecvError::Lagged(skipped)) => {
          tracing::warn!(channel = %channel, skipped, "subscriber lagged; events skipped");
        }
        Err(RecvError::Closed) => return None,
      }
    }
  })
  .boxed()
}
