//! commbridge: expose named frontend endpoints to a notebook backend.
//!
//! A frontend [`EndpointBridge`] negotiates a private comm channel with the
//! backend and then answers `call`, `query` and `cancel` actions against a
//! registry of named targets ([`Refs`]). The backend side is [`CommWidget`].
//! Comm plumbing lives in [`host`]; [`bridge::link`] carries comm frames
//! between processes.

pub mod backend;
pub mod bridge;
pub mod endpoint;
pub mod error;
pub mod error_log;
pub mod frontend;
pub mod host;
pub mod logging;
pub mod pending;
pub mod router;
pub mod setup;

pub use backend::CommWidget;
pub use bridge::protocol::{Action, Callback, Command, Invoke, Outcome};
pub use endpoint::{CancelHandle, Invocation, Lookup, ObjectTarget, Refs, Target, arg};
pub use error::{BridgeError, EndpointError, HostError, QueryError};
pub use error_log::ErrorLog;
pub use frontend::EndpointBridge;
pub use setup::BridgeConfig;
