//! Core types and trait definitions for the Natter chat service.
//!
//! This crate is deliberately free of HTTP, database, and async-runtime
//! dependencies. Every other crate in the workspace depends on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod conversation;
pub mod error;
pub mod ids;
pub mod message;
pub mod store;
pub mod user;
pub mod wire;

pub use error::{Error, Result};
pub use ids::{ConversationId, MessageId, UserId};
