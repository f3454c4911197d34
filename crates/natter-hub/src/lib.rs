//! Live delivery for Natter: who is connected here, who may see what, and
//! how a persisted message reaches every process that holds a recipient.
//!
//! [`ChatHub`] is the entry point. It is constructed explicitly at startup
//! from a [`natter_core::store::ChatStore`] and a [`Broker`], and torn down
//! with [`ChatHub::drain`].

pub mod broker;
pub mod error;
pub mod fanout;
pub mod harness;
pub mod hub;
pub mod membership;
pub mod presence;
pub mod registry;

pub use broker::{Broker, MemoryBroker};
pub use error::{Error, Result};
pub use harness::ScanStrategy;
pub use hub::{ChatHub, SendOutcome};
pub use registry::{Connection, ConnectionHandle, ConnectionRegistry};
