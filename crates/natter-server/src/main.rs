//! natter server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered under
//! `NATTER_*` environment variables, opens the SQLite store, and serves the
//! chat API and live socket over HTTP.
//!
//! # Provisioning
//!
//! Accounts are created by the operator; the password is read from stdin:
//!
//! ```text
//! natter add-user --email a@example.com --first-name Ada --last-name Lovelace
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::{Parser, Subcommand};
use natter_core::{store::ChatStore, user::NewUser};
use natter_hub::{ChatHub, MemoryBroker};
use natter_server::{AppState, ServerConfig};
use natter_store_sqlite::SqliteStore;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Natter chat server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Create an account. The password is read from stdin.
  AddUser {
    #[arg(long)]
    email:      String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name:  String,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    println!("{}", hash_password(&read_password()?)?);
    return Ok(());
  }

  let server_cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = server_cfg.resolved_store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  if let Some(Command::AddUser { email, first_name, last_name }) = cli.command {
    let password_hash = hash_password(&read_password()?)?;
    let user = store
      .add_user(NewUser { email, first_name, last_name, password_hash })
      .await
      .context("failed to add user")?;
    println!("created user {} <{}>", user.id, user.email);
    return Ok(());
  }

  let broker = MemoryBroker::new(server_cfg.broker_buffer);
  let hub = ChatHub::start(Arc::new(store), Arc::new(broker))
    .await
    .context("failed to start chat hub")?;
  let hub = Arc::new(hub);

  let state = AppState {
    hub:    hub.clone(),
    config: Arc::new(server_cfg.clone()),
  };

  let app = natter_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  // Live sockets are detached from the HTTP server once upgraded, so they
  // are drained through the hub before the server stops.
  let timeout = server_cfg.shutdown_timeout();
  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
      }
      tracing::info!("shutdown requested");
      if !hub.drain(timeout).await {
        tracing::warn!("some connections were still open at shutdown");
      }
    })
    .await
    .context("server error")?;

  tracing::info!("stopped");
  Ok(())
}

fn hash_password(password: &str) -> anyhow::Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Ok(
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string(),
  )
}

/// Read one line from stdin as the password.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  let password = line.trim_end_matches(['\n', '\r']).to_string();
  anyhow::ensure!(!password.is_empty(), "empty password");
  Ok(password)
}
