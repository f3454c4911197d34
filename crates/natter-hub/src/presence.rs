//! Presence tracking driven by connection lifecycle edges.
//!
//! The tracker holds the in-process view. Each real transition is also
//! pushed onto an update queue so a background task can persist it; repeated
//! marks in the same direction are no-ops and produce no update.

use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use natter_core::{UserId, user::PresenceState};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct PresenceTracker {
  states:  DashMap<UserId, PresenceState>,
  updates: Option<mpsc::UnboundedSender<PresenceState>>,
}

impl PresenceTracker {
  /// A tracker that keeps state in memory only.
  pub fn new() -> Self { Self::default() }

  /// A tracker that also emits every transition on the returned queue.
  pub fn with_updates() -> (Self, mpsc::UnboundedReceiver<PresenceState>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { states: DashMap::new(), updates: Some(tx) }, rx)
  }

  /// Returns `true` if the user was not already online.
  pub fn mark_online(&self, user: UserId) -> bool {
    let state = match self.states.entry(user) {
      Entry::Occupied(mut e) => {
        if e.get().is_online {
          return false;
        }
        let next = PresenceState { is_online: true, ..*e.get() };
        e.insert(next);
        next
      }
      Entry::Vacant(e) => *e.insert(PresenceState::online(user)),
    };
    tracing::debug!(user = %user, "online");
    self.emit(state);
    true
  }

  /// Returns `true` if the user was online. Stamps `last_seen` with now.
  pub fn mark_offline(&self, user: UserId) -> bool {
    let state = match self.states.get_mut(&user) {
      Some(mut s) if s.is_online => {
        *s = PresenceState::offline(user, Utc::now());
        *s
      }
      _ => return false,
    };
    tracing::debug!(user = %user, "offline");
    self.emit(state);
    true
  }

  pub fn get(&self, user: UserId) -> Option<PresenceState> {
    self.states.get(&user).map(|s| *s)
  }

  pub fn is_online(&self, user: UserId) -> bool {
    self.get(user).is_some_and(|s| s.is_online)
  }

  fn emit(&self, state: PresenceState) {
    if let Some(tx) = &self.updates
      && tx.send(state).is_err()
    {
      tracing::debug!(user = %state.user_id, "presence update dropped; writer gone");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transitions_are_idempotent() {
    let p = PresenceTracker::new();
    let u = UserId(1);

    assert!(!p.mark_offline(u), "unknown user is already offline");
    assert!(p.mark_online(u));
    assert!(!p.mark_online(u));
    assert!(p.is_online(u));

    assert!(p.mark_offline(u));
    assert!(!p.mark_offline(u));
    let state = p.get(u).unwrap();
    assert!(!state.is_online);
    assert!(state.last_seen.is_some());
  }

  #[test]
  fn only_real_transitions_are_emitted() {
    let (p, mut rx) = PresenceTracker::with_updates();
    let u = UserId(7);
    p.mark_online(u);
    p.mark_online(u);
    p.mark_offline(u);
    p.mark_offline(u);

    assert!(rx.try_recv().unwrap().is_online);
    assert!(!rx.try_recv().unwrap().is_online);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn going_online_keeps_last_seen() {
    let p = PresenceTracker::new();
    let u = UserId(2);
    p.mark_online(u);
    p.mark_offline(u);
    let seen = p.get(u).unwrap().last_seen;
    p.mark_online(u);
    assert_eq!(p.get(u).unwrap().last_seen, seen);
  }
}
