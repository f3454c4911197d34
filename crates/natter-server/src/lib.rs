//! HTTP and WebSocket surface for Natter.
//!
//! Exposes an axum [`Router`] over a [`ChatHub`]: the live socket at `/ws`
//! plus the REST routes under `/api/v1`.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod ws;

pub use error::Error;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use axum::{
  Router,
  routing::get,
  routing::post,
};
use natter_core::store::ChatStore;
use natter_hub::{Broker, ChatHub};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use handlers::{conversations, messages, senders};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `NATTER_*` environment variables. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                  String,
  pub port:                  u16,
  pub store_path:            PathBuf,
  /// Per-channel backlog of the in-memory broker.
  pub broker_buffer:         usize,
  /// Frames queued per connection before live pushes are dropped.
  pub outbound_buffer:       usize,
  pub shutdown_timeout_secs: u64,
  /// Serve `GET /api/v1/senders`.
  pub expose_sender_scan:    bool,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                  "127.0.0.1".to_string(),
      port:                  8080,
      store_path:            PathBuf::from("natter.db"),
      broker_buffer:         1024,
      outbound_buffer:       64,
      shutdown_timeout_secs: 10,
      expose_sender_scan:    false,
    }
  }
}

impl ServerConfig {
  /// Read `path` if it exists, then let `NATTER_*` variables override it
  /// (`NATTER_PORT=9000`).
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("NATTER"))
      .build()?
      .try_deserialize()
  }

  /// `store_path` with a leading `~/` expanded to the home directory.
  pub fn resolved_store_path(&self) -> PathBuf {
    let raw = self.store_path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("~/")
      && let Ok(home) = std::env::var("HOME")
    {
      return PathBuf::from(home).join(rest);
    }
    self.store_path.clone()
  }

  pub fn shutdown_timeout(&self) -> Duration { Duration::from_secs(self.shutdown_timeout_secs) }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, B> {
  pub hub:    Arc<ChatHub<S, B>>,
  pub config: Arc<ServerConfig>,
}

impl<S, B> Clone for AppState<S, B> {
  fn clone(&self) -> Self {
    Self { hub: self.hub.clone(), config: self.config.clone() }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the axum [`Router`] for the chat server.
pub fn router<S, B>(state: AppState<S, B>) -> Router
where
  S: ChatStore + 'static,
  B: Broker,
{
  Router::new()
    .route("/health",                             get(health))
    .route("/ws",                                 get(ws::upgrade::<S, B>))
    .route("/api/v1/messages",                    post(messages::send::<S, B>))
    .route(
      "/api/v1/conversations",
      get(conversations::list::<S, B>).post(conversations::create::<S, B>),
    )
    .route("/api/v1/conversations/{id}/messages", get(messages::history::<S, B>))
    .route("/api/v1/conversations/{id}/unread",   get(messages::unread::<S, B>))
    .route("/api/v1/conversations/{id}/read",     post(messages::mark_read::<S, B>))
    .route("/api/v1/senders",                     get(senders::distinct::<S, B>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn health() -> &'static str { "ok" }

// ─── Integration tests ────────────────────────────────────────────────────────
