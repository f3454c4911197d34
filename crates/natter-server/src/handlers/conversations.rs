use axum::{Json, extract::State, http::StatusCode};
use natter_core::{
  UserId,
  conversation::{Conversation, ConversationKind},
  store::ChatStore,
};
use natter_hub::Broker;
use serde::Deserialize;

use crate::{AppState, auth::Identity, error::Error};

#[derive(Debug, Deserialize)]
pub struct CreateConversation {
  #[serde(default)]
  pub kind:    ConversationKind,
  #[serde(default)]
  pub name:    Option<String>,
  /// Other members; the caller is always added.
  #[serde(default)]
  pub members: Vec<UserId>,
}

pub async fn create<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
  Json(body): Json<CreateConversation>,
) -> Result<(StatusCode, Json<Conversation>), Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  if body.kind == ConversationKind::Direct
    && body.members.iter().filter(|m| **m != user).count() != 1
  {
    return Err(Error::BadRequest(
      "a direct conversation needs exactly one other member".into(),
    ));
  }

  let conversation = state
    .hub
    .create_conversation(user, body.kind, body.name, body.members)
    .await?;
  Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
) -> Result<Json<Vec<Conversation>>, Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  Ok(Json(state.hub.conversations(user).await?))
}
