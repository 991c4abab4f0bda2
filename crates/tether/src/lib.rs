//! Tether: mirror a remote-owned data model over a duplex channel
//!
//! The [`Channel`] keeps a connection to the model owner alive, applies the
//! diffs it pushes to a local [`Mirror`](tether_state::Mirror), fans named
//! events out to listeners, runs remotely invoked commands and correlates
//! outbound calls with their responses.

pub mod channel;
pub mod client;
pub mod commands;
pub mod config;
pub mod correlation;
pub mod listeners;
pub mod reconnect;
pub mod session;

pub use channel::{CallHandle, Channel, ChannelBuilder};
pub use commands::{CommandHandler, CommandResolver, CommandTable};
pub use config::{ChannelConfig, ConfigError};
pub use correlation::{CallReply, CorrelationTable};
pub use listeners::{Event, ListenerId, ListenerRegistry};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, Reconnector};
pub use session::{ChannelState, Session, Transition};

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Remote call failed: {0}")]
    Remote(Value),

    #[error("Channel terminated")]
    Terminated,

    #[error("Channel disconnected")]
    Disconnected,

    #[error("Channel shut down")]
    Shutdown,

    #[error("Encode error: {0}")]
    Encode(String),
}
