//! Users and presence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user as seen by the chat core. The password hash never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id:         UserId,
  pub email:      String,
  pub first_name: String,
  pub last_name:  String,
  pub is_online:  bool,
  pub last_seen:  Option<DateTime<Utc>>,
}

/// Input to [`crate::store::ChatStore::add_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
  pub email:         String,
  pub first_name:    String,
  pub last_name:     String,
  /// argon2 PHC string.
  pub password_hash: String,
}

/// Online/offline status plus the moment the user was last seen.
///
/// Last writer wins; there is no merge across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
  pub user_id:   UserId,
  pub is_online: bool,
  pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceState {
  pub fn online(user_id: UserId) -> Self {
    Self { user_id, is_online: true, last_seen: None }
  }

  pub fn offline(user_id: UserId, at: DateTime<Utc>) -> Self {
    Self { user_id, is_online: false, last_seen: Some(at) }
  }
}
