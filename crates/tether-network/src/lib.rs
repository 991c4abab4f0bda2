//! Network layer for Tether
//!
//! Frame protocol spoken with the remote model owner, plus the transport
//! abstraction the channel runs on and a length-prefixed TCP implementation.

pub mod codec;
pub mod protocol;
pub mod transport;

pub use codec::{FramedCodec, WireFrame, DEFAULT_MAX_FRAME_LEN};
pub use protocol::{
    Call, CallOutcome, InboundFrame, OutboundFrame, PROCESS_TERMINATED_EVENT, TERMINATION_NOTICE,
};
pub use transport::{
    CloseCode, Connector, TcpConnector, TcpTransport, Transport, TransportEvent,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
