//! The live-connection registry: user id → that user's open connections on
//! this process.
//!
//! A connection is the sending half of a bounded outbound queue; the socket
//! writer task owns the receiving half. Handles are never reused, so
//! unregistering one twice is harmless.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use natter_core::{UserId, wire::OutboundFrame};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::{Error, Result, presence::PresenceTracker};

/// Identifies one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
  pub id:      Uuid,
  pub user_id: UserId,
}

/// A registered connection. Cloning shares the same outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
  handle: ConnectionHandle,
  tx:     mpsc::Sender<OutboundFrame>,
}

impl Connection {
  pub fn handle(&self) -> ConnectionHandle { self.handle }

  /// Queue a frame without waiting.
  ///
  /// A full queue drops this frame for this connection only; a closed queue
  /// means the socket is gone and is reported as [`Error::ConnectionLost`].
  pub fn deliver(&self, frame: OutboundFrame) -> Result<()> {
    match self.tx.try_send(frame) {
      Ok(()) => Ok(()),
      Err(mpsc::error::TrySendError::Full(_)) => {
        tracing::warn!(
          connection = %self.handle.id,
          user = %self.handle.user_id,
          "outbound queue full; dropping frame",
        );
        Ok(())
      }
      Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ConnectionLost(self.handle.id)),
    }
  }
}

pub struct ConnectionRegistry {
  by_user:  DashMap<UserId, Vec<Connection>>,
  presence: Arc<PresenceTracker>,
  count:    watch::Sender<usize>,
}

impl ConnectionRegistry {
  pub fn new(presence: Arc<PresenceTracker>) -> Self {
    Self {
      by_user: DashMap::new(),
      presence,
      count: watch::Sender::new(0),
    }
  }

  /// Register `tx` as a new connection for `user`. The user's first
  /// connection marks them online.
  pub fn register(&self, user: UserId, tx: mpsc::Sender<OutboundFrame>) -> ConnectionHandle {
    let handle = ConnectionHandle { id: Uuid::new_v4(), user_id: user };

    {
      let mut conns = self.by_user.entry(user).or_default();
      if conns.is_empty() {
        self.presence.mark_online(user);
      }
      conns.push(Connection { handle, tx });
    }

    self.count.send_modify(|n| *n += 1);
    tracing::debug!(connection = %handle.id, user = %user, "connection registered");
    handle
  }

  /// Remove a connection. Unknown or already-removed handles are a no-op
  /// and return `false`. Removing the user's last connection marks them
  /// offline.
  pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
    let Entry::Occupied(mut entry) = self.by_user.entry(handle.user_id) else {
      return false;
    };

    let before = entry.get().len();
    entry.get_mut().retain(|c| c.handle.id != handle.id);
    if entry.get().len() == before {
      return false;
    }

    if entry.get().is_empty() {
      // Still under the entry lock, so a concurrent register for this user
      // cannot mark them online in between.
      self.presence.mark_offline(handle.user_id);
      entry.remove();
    } else {
      drop(entry);
    }

    self.count.send_modify(|n| *n = n.saturating_sub(1));
    tracing::debug!(connection = %handle.id, user = %handle.user_id, "connection unregistered");
    true
  }

  /// Every live connection `user` has on this process; empty if none.
  pub fn lookup_all(&self, user: UserId) -> Vec<Connection> {
    self
      .by_user
      .get(&user)
      .map(|conns| conns.clone())
      .unwrap_or_default()
  }

  pub fn is_connected(&self, user: UserId) -> bool { self.by_user.contains_key(&user) }

  /// Number of live connections across all users.
  pub fn len(&self) -> usize { *self.count.borrow() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Resolves once no connection is registered.
  pub async fn wait_empty(&self) {
    let mut rx = self.count.subscribe();
    // The sender lives in `self`, so this cannot observe a closed channel.
    let _ = rx.wait_for(|n| *n == 0).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> (ConnectionRegistry, Arc<PresenceTracker>) {
    let presence = Arc::new(PresenceTracker::new());
    (ConnectionRegistry::new(presence.clone()), presence)
  }

  #[test]
  fn lookup_unknown_user_is_empty() {
    let (r, _) = registry();
    assert!(r.lookup_all(UserId(1)).is_empty());
  }

  #[test]
  fn multiple_devices_per_user() {
    let (r, _) = registry();
    let (tx1, _rx1) = mpsc::channel(4);
    let (tx2, _rx2) = mpsc::channel(4);
    let h1 = r.register(UserId(1), tx1);
    let h2 = r.register(UserId(1), tx2);

    let handles: Vec<_> = r.lookup_all(UserId(1)).iter().map(Connection::handle).collect();
    assert_eq!(handles, vec![h1, h2]);
    assert_eq!(r.len(), 2);
  }

  #[test]
  fn unregister_twice_is_same_as_once() {
    let (r, _) = registry();
    let (tx1, _rx1) = mpsc::channel(4);
    let (tx2, _rx2) = mpsc::channel(4);
    let h1 = r.register(UserId(1), tx1);
    let h2 = r.register(UserId(1), tx2);

    assert!(r.unregister(&h1));
    assert!(!r.unregister(&h1));
    assert_eq!(r.len(), 1);
    assert_eq!(r.lookup_all(UserId(1)).len(), 1);
    assert_eq!(r.lookup_all(UserId(1))[0].handle(), h2);
  }

  #[test]
  fn presence_follows_first_and_last_connection() {
    let (r, presence) = registry();
    let (tx1, _rx1) = mpsc::channel(4);
    let (tx2, _rx2) = mpsc::channel(4);

    let h1 = r.register(UserId(5), tx1);
    assert!(presence.is_online(UserId(5)));
    let h2 = r.register(UserId(5), tx2);

    r.unregister(&h1);
    assert!(presence.is_online(UserId(5)), "one device still connected");
    r.unregister(&h2);
    assert!(!presence.is_online(UserId(5)));
    assert!(!r.is_connected(UserId(5)));
  }

  #[test]
  fn deliver_to_closed_queue_is_connection_lost() {
    let (r, _) = registry();
    let (tx, rx) = mpsc::channel(4);
    let h = r.register(UserId(1), tx);
    drop(rx);

    let conn = r.lookup_all(UserId(1)).remove(0);
    let frame = OutboundFrame::Error(natter_core::wire::ErrorFrame {
      error:           "x".into(),
      conversation_id: None,
    });
    assert!(matches!(conn.deliver(frame), Err(Error::ConnectionLost(id)) if id == h.id));
  }

  #[test]
  fn deliver_to_full_queue_drops_silently() {
    let (r, _) = registry();
    let (tx, mut rx) = mpsc::channel(1);
    r.register(UserId(1), tx);
    let conn = r.lookup_all(UserId(1)).remove(0);
    let frame = || {
      OutboundFrame::Error(natter_core::wire::ErrorFrame {
        error:           "x".into(),
        conversation_id: None,
      })
    };

    assert!(conn.deliver(frame()).is_ok());
    assert!(conn.deliver(frame()).is_ok());
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn concurrent_register_and_unregister_settle_to_empty() {
    let (r, presence) = registry();
    let r = Arc::new(r);

    std::thread::scope(|scope| {
      for t in 0..8 {
        let r = r.clone();
        scope.spawn(move || {
          for _ in 0..200 {
            let (tx, _rx) = mpsc::channel(1);
            let h = r.register(UserId(t % 3), tx);
            r.lookup_all(UserId(t % 3));
            r.unregister(&h);
          }
        });
      }
    });

    assert!(r.is_empty());
    for u in 0..3 {
      assert!(!presence.is_online(UserId(u)));
    }
  }

  #[tokio::test]
  async fn wait_empty_resolves_after_last_unregister() {
    let (r, _) = registry();
    let r = Arc::new(r);
    let (tx, _rx) = mpsc::channel(1);
    let h = r.register(UserId(1), tx);

    let waiter = tokio::spawn({
      let r = r.clone();
      async move { r.wait_empty().await }
    });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    r.unregister(&h);
    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap();
  }
}
