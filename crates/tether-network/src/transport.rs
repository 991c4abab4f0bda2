//! Transport abstraction and the TCP implementation
//!
//! The channel only needs three things from a connection: send a text
//! frame, wait for the next inbound event, and close. Anything that can
//! do that (TCP, an in-memory pair in tests) plugs in through
//! [`Transport`] and [`Connector`].

use crate::codec::{FramedCodec, WireFrame, DEFAULT_MAX_FRAME_LEN};
use crate::NetworkError;
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Close code attached to a transport shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Peer closed on purpose
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Connection dropped without a close handshake
    pub const ABNORMAL: CloseCode = CloseCode(1006);

    /// Only an abnormal drop is worth reconnecting after
    pub fn is_abnormal(self) -> bool {
        self == Self::ABNORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a transport produced next
#[derive(Debug)]
pub enum TransportEvent {
    Frame(String),
    Closed(CloseCode),
    Error(NetworkError),
}

/// An open, bidirectional frame connection
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> Result<(), NetworkError>;

    /// Wait for the next inbound event
    ///
    /// Must be cancel safe: dropping the future may not lose buffered data.
    async fn recv(&mut self) -> TransportEvent;

    async fn close(&mut self) -> Result<(), NetworkError>;
}

/// Opens new transports to one fixed endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, NetworkError>;
}

/// Length-prefixed frames over a TCP stream
pub struct TcpTransport {
    stream: TcpStream,
    codec: FramedCodec,
    read_buf: BytesMut,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, codec: FramedCodec) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream,
            codec,
            read_buf: BytesMut::with_capacity(8 * 1024),
            peer,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: String) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::NotConnected);
        }

        let mut buf = BytesMut::with_capacity(4 + frame.len());
        self.codec.encode(&frame, &mut buf)?;
        self.stream
            .write_all(&buf)
            .await
            .map_err(|e| NetworkError::TransportError(format!("Write failed: {e}")))?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Closed(CloseCode::NORMAL);
        }

        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(WireFrame::Text(text))) => return TransportEvent::Frame(text),
                Ok(Some(WireFrame::Close)) => {
                    debug!(peer = ?self.peer, "peer closed connection");
                    self.closed = true;
                    return TransportEvent::Closed(CloseCode::NORMAL);
                }
                Ok(None) => {}
                Err(e) => return TransportEvent::Error(e),
            }

            match self.stream.read_buf(&mut self.read_buf).await {
                Ok(0) => {
                    debug!(peer = ?self.peer, "stream ended without close frame");
                    self.closed = true;
                    return TransportEvent::Closed(CloseCode::ABNORMAL);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = ?self.peer, "read failed: {}", e);
                    self.closed = true;
                    return TransportEvent::Closed(CloseCode::ABNORMAL);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut buf = BytesMut::with_capacity(4);
        FramedCodec::encode_close(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Dials a TCP endpoint, `host:port`
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    max_frame_len: usize,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, NetworkError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;

        info!("Connected to {}", self.addr);
        Ok(Box::new(TcpTransport::new(
            stream,
            FramedCodec::new(self.max_frame_len),
        )))
    }
}
