//! Send, history, unread count, and mark-read.

use axum::{
  Json,
  body::Bytes,
  extract::{Path, Query, State},
  http::StatusCode,
};
use natter_core::{
  ConversationId, MessageId,
  message::{HistoryQuery, Message},
  store::ChatStore,
  wire::InboundFrame,
};
use natter_hub::{Broker, SendOutcome};
use serde::{Deserialize, Serialize};

use crate::{AppState, auth::Identity, error::Error};

/// `POST /api/v1/messages`. The body is the same frame a socket would send.
pub async fn send<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
  body: Bytes,
) -> Result<(StatusCode, Json<SendOutcome>), Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  let frame = InboundFrame::parse(&body).map_err(|e| Error::BadRequest(e.to_string()))?;
  let outcome = state.hub.send_message(user, frame).await?;
  Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  pub limit:  Option<usize>,
  pub before: Option<i64>,
}

pub async fn history<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
  Path(id): Path<i64>,
  Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  let query = HistoryQuery {
    limit:  params.limit,
    before: params.before.map(MessageId),
  };
  let messages = state.hub.history(user, ConversationId(id), query).await?;
  Ok(Json(messages))
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
  #[serde(rename = "conversationID")]
  pub conversation_id: ConversationId,
  pub unread:          u64,
}

pub async fn unread<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
  Path(id): Path<i64>,
) -> Result<Json<UnreadCount>, Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  let conversation_id = ConversationId(id);
  let unread = state.hub.unread_count(user, conversation_id).await?;
  Ok(Json(UnreadCount { conversation_id, unread }))
}

pub async fn mark_read<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
  Path(id): Path<i64>,
) -> Result<StatusCode, Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  state.hub.mark_read(user, ConversationId(id)).await?;
  Ok(StatusCode::NO_CONTENT)
}
