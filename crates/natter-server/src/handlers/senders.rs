//! Distinct senders across all stored messages. Operator-only: the route
//! answers 404 unless `expose_sender_scan` is set.

use axum::{
  Json,
  extract::{Query, State},
};
use natter_core::{UserId, store::ChatStore};
use natter_hub::{Broker, ScanStrategy};
use serde::{Deserialize, Serialize};

use crate::{AppState, auth::Identity, error::Error};

const DEFAULT_WORKERS: usize = 4;
const MAX_WORKERS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ScanParams {
  pub workers: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct Senders {
  pub senders: Vec<UserId>,
}

pub async fn distinct<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(_): Identity,
  Query(params): Query<ScanParams>,
) -> Result<Json<Senders>, Error>
where
  S: ChatStore + 'static,
  B: Broker,
{
  if !state.config.expose_sender_scan {
    return Err(Error::NotFound);
  }

  let workers = params.workers.unwrap_or(DEFAULT_WORKERS).clamp(1, MAX_WORKERS);
  let senders = state
    .hub
    .distinct_senders(ScanStrategy::MutexGuarded, workers)
    .await?;
  Ok(Json(Senders { senders }))
}
