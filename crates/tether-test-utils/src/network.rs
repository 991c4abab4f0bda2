//! In-memory transport for driving a channel from tests
//!
//! [`MemoryConnector`] hands out transports whose far end shows up as a
//! [`RemotePeer`] on the paired [`PeerAcceptor`]. Connection attempts can
//! be scripted to fail so reconnect behavior is testable without sockets.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tether_network::{CloseCode, Connector, NetworkError, Transport, TransportEvent};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<ConnectOutcome>,
    refusing: bool,
}

#[derive(Clone)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    attempts: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<RemotePeer>,
}

pub struct PeerAcceptor {
    peers: mpsc::UnboundedReceiver<RemotePeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, PeerAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(Script::default())),
            attempts: Arc::new(AtomicUsize::new(0)),
            peers: tx,
        };
        (connector, PeerAcceptor { peers: rx })
    }

    /// Queue the outcome of the next unscripted attempt
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.script.lock().unwrap().queued.push_back(outcome);
    }

    /// Refuse every attempt once the queued outcomes run out
    pub fn set_refusing(&self, refusing: bool) {
        self.script.lock().unwrap().refusing = refusing;
    }

    /// Connection attempts made so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let outcome = {
            let mut script = self.script.lock().unwrap();
            let fallback = if script.refusing {
                ConnectOutcome::Refuse
            } else {
                ConnectOutcome::Accept
            };
            script.queued.pop_front().unwrap_or(fallback)
        };
        if outcome == ConnectOutcome::Refuse {
            return Err(NetworkError::ConnectionFailed("refused by script".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let reject_sends = Arc::new(AtomicBool::new(false));
        let client_closed = Arc::new(AtomicBool::new(false));

        let peer = RemotePeer {
            to_client,
            from_client,
            reject_sends: reject_sends.clone(),
            client_closed: client_closed.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| NetworkError::ConnectionFailed("acceptor dropped".to_string()))?;

        Ok(Box::new(MemoryTransport {
            inbound,
            outbound,
            reject_sends,
            client_closed,
        }))
    }
}

impl PeerAcceptor {
    pub async fn accept(&mut self) -> Result<RemotePeer> {
        self.peers
            .recv()
            .await
            .ok_or_else(|| anyhow!("connector dropped"))
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
    reject_sends: Arc<AtomicBool>,
    client_closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<(), NetworkError> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(NetworkError::TransportError("send rejected by peer".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| NetworkError::TransportError("peer gone".to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(CloseCode::ABNORMAL))
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        self.client_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Far end of one accepted in-memory connection
pub struct RemotePeer {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
    reject_sends: Arc<AtomicBool>,
    client_closed: Arc<AtomicBool>,
}

impl RemotePeer {
    pub fn send_frame(&self, frame: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Frame(frame.into()));
    }

    pub fn send_json(&self, value: Value) {
        self.send_frame(value.to_string());
    }

    pub fn close(&self, code: CloseCode) {
        let _ = self.to_client.send(TransportEvent::Closed(code));
    }

    /// Surface a transport error on the client side
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Error(NetworkError::TransportError(reason.to_string())));
    }

    /// Make every later client send fail
    pub fn reject_sends(&self) {
        self.reject_sends.store(true, Ordering::SeqCst);
    }

    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    /// Next frame the client sent, `None` once its transport is gone
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub async fn recv_json(&mut self) -> Result<Value> {
        let frame = self
            .recv_frame()
            .await
            .ok_or_else(|| anyhow!("client transport dropped"))?;
        Ok(serde_json::from_str(&frame)?)
    }

    /// A frame that is already waiting, without blocking
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}
