//! The membership gate consulted before subscribe, send, and any
//! conversation-scoped read.

use std::sync::Arc;

use natter_core::{ConversationId, UserId, store::ChatStore};

use crate::{Error, Result};

pub struct MembershipValidator<S> {
  store: Arc<S>,
}

impl<S> Clone for MembershipValidator<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: ChatStore> MembershipValidator<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Asks the store every time; nothing is cached.
  pub async fn is_member(&self, user: UserId, conversation: ConversationId) -> Result<bool> {
    self
      .store
      .is_member(user, conversation)
      .await
      .map_err(Error::persistence)
  }

  /// `Ok(())` for members, [`Error::Forbidden`] otherwise. Storage failures
  /// stay [`Error::Persistence`] and are never reported as forbidden.
  pub async fn authorize(&self, user: UserId, conversation: ConversationId) -> Result<()> {
    if self.is_member(user, conversation).await? {
      Ok(())
    } else {
      tracing::debug!(user = %user, conversation = %conversation, "membership check failed");
      Err(Error::Forbidden { user, conversation })
    }
  }
}
