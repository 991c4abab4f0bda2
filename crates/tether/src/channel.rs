//! Async channel driver and the host-facing handle
//!
//! One driver task per channel owns the [`Session`] and the live
//! transport. Hosts talk to it through cloneable [`Channel`] handles; the
//! mirror and the listener registry are shared directly so reads and
//! subscriptions never wait on the driver.

use crate::commands::{CommandResolver, CommandTable};
use crate::config::ChannelConfig;
use crate::correlation::CallReply;
use crate::listeners::{Event, ListenerId, ListenerRegistry};
use crate::reconnect::Reconnector;
use crate::session::{
    ChannelState, DefaultAction, ReadyWaiter, Session, SessionParts, Transition,
};
use crate::ChannelError;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, RwLock};
use tether_network::{Call, CloseCode, Connector, Transport, TransportEvent};
use tether_state::Mirror;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum Request {
    Connect { ready: ReadyWaiter },
    Call {
        call: Call,
        reply: oneshot::Sender<Result<CallReply, ChannelError>>,
    },
    Shutdown { done: oneshot::Sender<()> },
}

/// Pending result of one outbound call
pub struct CallHandle {
    rx: oneshot::Receiver<Result<CallReply, ChannelError>>,
}

impl CallHandle {
    pub async fn response(self) -> Result<CallReply, ChannelError> {
        // Sender dropped means the driver is gone
        self.rx.await.unwrap_or(Err(ChannelError::Shutdown))
    }
}

pub struct ChannelBuilder {
    config: ChannelConfig,
    commands: Arc<dyn CommandResolver>,
    default_action: DefaultAction,
}

impl ChannelBuilder {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            commands: Arc::new(CommandTable::new()),
            default_action: Arc::new(|notice| warn!("{}", notice)),
        }
    }

    pub fn commands(mut self, resolver: impl CommandResolver + 'static) -> Self {
        self.commands = Arc::new(resolver);
        self
    }

    /// Action run when the channel terminates and no listener calls
    /// [`Event::prevent_default`]; receives the configured notice text
    pub fn on_terminated<F>(mut self, action: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.default_action = Arc::new(action);
        self
    }

    /// Start the driver task; must be called inside a tokio runtime
    pub fn spawn(self, connector: impl Connector + 'static) -> Channel {
        let mirror = Arc::new(RwLock::new(Mirror::new()));
        let listeners = Arc::new(Mutex::new(ListenerRegistry::new()));
        let (session, state) = Session::new(SessionParts {
            markers: self.config.markers,
            terminated_notice: self.config.terminated_notice.clone(),
            reconnector: Reconnector::new((&self.config).into()),
            mirror: mirror.clone(),
            listeners: listeners.clone(),
            commands: self.commands,
            default_action: self.default_action,
        });

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            session,
            connector: Box::new(connector),
            transport: None,
            requests: requests_rx,
            reconnect_at: None,
        };
        tokio::spawn(driver.run());

        Channel {
            requests: requests_tx,
            mirror,
            listeners,
            state,
        }
    }
}

/// Handle to a running channel
#[derive(Clone)]
pub struct Channel {
    requests: mpsc::UnboundedSender<Request>,
    mirror: Arc<RwLock<Mirror>>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    state: watch::Receiver<ChannelState>,
}

impl Channel {
    pub fn builder(config: ChannelConfig) -> ChannelBuilder {
        ChannelBuilder::new(config)
    }

    /// Connect if not already connected and wait for the first model
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let (ready, rx) = oneshot::channel();
        self.requests
            .send(Request::Connect { ready })
            .map_err(|_| ChannelError::Shutdown)?;
        rx.await.unwrap_or(Err(ChannelError::Shutdown))
    }

    /// Send `call` with a fresh id, or queue it until the channel opens
    pub fn call(&self, call: Call) -> CallHandle {
        let (reply, rx) = oneshot::channel();
        // On failure the reply sender is dropped with the request and the
        // handle resolves to `Shutdown`
        let _ = self.requests.send(Request::Call { call, reply });
        CallHandle { rx }
    }

    pub fn call_fields(&self, fields: Map<String, Value>) -> CallHandle {
        self.call(Call::new(fields))
    }

    /// Call a remote method: `{"n": name, "v": args}`
    pub fn call_method(&self, name: impl Into<String>, args: Vec<Value>) -> CallHandle {
        self.call(Call::method(name, args))
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&mut Event) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribe(name, Arc::new(listener))
    }

    pub fn unsubscribe(&self, name: &str, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unsubscribe(name, id)
    }

    /// Run `f` against the mirror under its read lock
    ///
    /// The driver blocks on the write lock while `f` runs, so keep it short
    /// and never await inside it.
    pub fn with_mirror<R>(&self, f: impl FnOnce(&Mirror) -> R) -> R {
        let mirror = self.mirror.read().unwrap_or_else(|e| e.into_inner());
        f(&mirror)
    }

    /// Copy of the current model
    pub fn snapshot(&self) -> Value {
        self.with_mirror(|mirror| mirror.root().clone())
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Wait until the state satisfies `predicate`, checking the current state first
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&ChannelState) -> bool,
    ) -> Result<ChannelState, ChannelError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(predicate)
            .await
            .map_err(|_| ChannelError::Shutdown)?;
        Ok(*reached)
    }

    /// Send the termination notice if connected, close, and stop the driver
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Driver {
    session: Session,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    requests: mpsc::UnboundedReceiver<Request>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Connect { ready }) => {
                        if self.session.begin_connect(ready) {
                            self.open().await;
                        }
                    }
                    Some(Request::Call { call, reply }) => {
                        if let Some(frame) = self.session.call(call, reply) {
                            self.send_all(vec![frame]).await;
                        }
                    }
                    Some(Request::Shutdown { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        debug!("all channel handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                event = next_event(&mut self.transport) => self.on_event(event),
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    info!("reconnecting");
                    self.open().await;
                }
            }
        }
    }

    async fn open(&mut self) {
        match self.connector.connect().await {
            Ok(transport) => {
                self.transport = Some(transport);
                let queued = self.session.on_open();
                self.send_all(queued).await;
            }
            Err(e) => {
                let transition = self.session.on_connect_failed(&e);
                self.schedule(transition);
            }
        }
    }

    /// Send frames in order; on the first failure requeue the rest and
    /// treat the connection as dropped
    async fn send_all(&mut self, frames: Vec<String>) {
        let mut frames = frames.into_iter();
        while let Some(frame) = frames.next() {
            let Some(transport) = self.transport.as_mut() else {
                self.session.requeue_front(std::iter::once(frame).chain(frames));
                return;
            };
            if let Err(e) = transport.send(frame.clone()).await {
                warn!("send failed: {}", e);
                self.transport = None;
                self.session.requeue_front(std::iter::once(frame).chain(frames));
                let transition = self.session.on_closed(CloseCode::ABNORMAL);
                self.schedule(transition);
                return;
            }
        }
    }

    fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => self.session.on_frame(&text),
            TransportEvent::Closed(code) => {
                self.transport = None;
                let transition = self.session.on_closed(code);
                self.schedule(transition);
            }
            TransportEvent::Error(e) => {
                self.transport = None;
                let transition = self.session.on_transport_error(&e);
                self.schedule(transition);
            }
        }
    }

    fn schedule(&mut self, transition: Transition) {
        self.reconnect_at = match transition {
            Transition::ReconnectAfter(delay) => Some(Instant::now() + delay),
            Transition::Idle => None,
        };
    }

    async fn shutdown(&mut self) {
        self.reconnect_at = None;
        let notice = self.session.begin_shutdown();
        if let Some(mut transport) = self.transport.take() {
            if let Some(notice) = notice {
                // Best effort, the remote may already be gone
                if let Err(e) = transport.send(notice).await {
                    debug!("termination notice not sent: {}", e);
                }
            }
            if let Err(e) = transport.close().await {
                debug!("close failed: {}", e);
            }
        }
        self.session.finish_shutdown();
        info!("channel shut down");
    }
}

async fn next_event(transport: &mut Option<Box<dyn Transport>>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
