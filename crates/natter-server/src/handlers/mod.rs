//! REST handlers under `/api/v1`. Every route requires an [`Identity`].
//!
//! [`Identity`]: crate::auth::Identity

pub mod conversations;
pub mod messages;
pub mod senders;
