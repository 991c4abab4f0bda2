//! Channel state machine, free of I/O
//!
//! The session owns everything the channel knows: connection state, the
//! outbound queue, pending calls, readiness waiters and the reconnect
//! counter. The async driver in [`crate::channel`] feeds it transport
//! events and performs whatever sends or timers it asks for.

use crate::commands::CommandResolver;
use crate::correlation::{CorrelationTable, ReplySender};
use crate::listeners::{emit, Event, ListenerRegistry};
use crate::reconnect::{ReconnectDecision, Reconnector};
use crate::ChannelError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tether_network::{
    Call, CloseCode, InboundFrame, NetworkError, OutboundFrame, PROCESS_TERMINATED_EVENT,
    TERMINATION_NOTICE,
};
use tether_state::{Markers, Mirror};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    /// Permanently gone, no further recovery
    Terminated,
}

/// What the driver has to do after a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing scheduled
    Idle,
    /// Open a new transport after the delay
    ReconnectAfter(Duration),
}

pub type ReadyWaiter = oneshot::Sender<Result<(), ChannelError>>;

/// Runs when the channel terminates and no listener prevented it
pub type DefaultAction = Arc<dyn Fn(&str) + Send + Sync>;

pub struct Session {
    state: ChannelState,
    state_tx: watch::Sender<ChannelState>,
    markers: Markers,
    terminated_notice: String,

    correlation: CorrelationTable,
    queue: VecDeque<String>,
    ready: bool,
    ready_waiters: Vec<ReadyWaiter>,
    reconnector: Reconnector,
    reconnecting: bool,

    mirror: Arc<RwLock<Mirror>>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    commands: Arc<dyn CommandResolver>,
    default_action: DefaultAction,
}

pub struct SessionParts {
    pub markers: Markers,
    pub terminated_notice: String,
    pub reconnector: Reconnector,
    pub mirror: Arc<RwLock<Mirror>>,
    pub listeners: Arc<Mutex<ListenerRegistry>>,
    pub commands: Arc<dyn CommandResolver>,
    pub default_action: DefaultAction,
}

impl Session {
    pub fn new(parts: SessionParts) -> (Self, watch::Receiver<ChannelState>) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let session = Self {
            state: ChannelState::Disconnected,
            state_tx,
            markers: parts.markers,
            terminated_notice: parts.terminated_notice,
            correlation: CorrelationTable::new(),
            queue: VecDeque::new(),
            ready: false,
            ready_waiters: Vec::new(),
            reconnector: parts.reconnector,
            reconnecting: false,
            mirror: parts.mirror,
            listeners: parts.listeners,
            commands: parts.commands,
            default_action: parts.default_action,
        };
        (session, state_rx)
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_calls(&self) -> usize {
        self.correlation.len()
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "channel state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Host asked to connect; returns true when a transport should be opened now
    ///
    /// `waiter` resolves once the first model has been applied, immediately
    /// if that already happened.
    pub fn begin_connect(&mut self, waiter: ReadyWaiter) -> bool {
        match self.state {
            ChannelState::Terminated => {
                let _ = waiter.send(Err(ChannelError::Terminated));
                false
            }
            ChannelState::Closing => {
                let _ = waiter.send(Err(ChannelError::Shutdown));
                false
            }
            ChannelState::Connecting | ChannelState::Open => {
                self.add_waiter(waiter);
                false
            }
            ChannelState::Disconnected => {
                // A fresh connection has to deliver its own model
                self.ready = false;
                self.ready_waiters.push(waiter);
                self.reconnecting = false;
                self.set_state(ChannelState::Connecting);
                true
            }
        }
    }

    fn add_waiter(&mut self, waiter: ReadyWaiter) {
        if self.ready {
            let _ = waiter.send(Ok(()));
        } else {
            self.ready_waiters.push(waiter);
        }
    }

    /// A transport opened; returns the queued frames to flush, oldest first
    pub fn on_open(&mut self) -> Vec<String> {
        info!(queued = self.queue.len(), "channel open");
        self.reconnector.reset();
        self.reconnecting = false;
        self.set_state(ChannelState::Open);
        self.queue.drain(..).collect()
    }

    /// Put frames that could not be sent back at the head of the queue
    pub fn requeue_front(&mut self, frames: impl IntoIterator<Item = String>) {
        let mut frames: Vec<String> = frames.into_iter().collect();
        while let Some(frame) = frames.pop() {
            self.queue.push_front(frame);
        }
    }

    /// Register an outbound call; returns the frame to send now, if open
    pub fn call(&mut self, call: Call, reply: ReplySender) -> Option<String> {
        if self.state == ChannelState::Terminated {
            let _ = reply.send(Err(ChannelError::Terminated));
            return None;
        }

        let id = self.correlation.register(reply);
        let frame = match (OutboundFrame::Call { id, call }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.correlation.reject(id, ChannelError::Encode(e.to_string()));
                return None;
            }
        };

        if self.state == ChannelState::Open {
            debug!(id, "sending call");
            Some(frame)
        } else {
            debug!(id, queued = self.queue.len() + 1, "queueing call");
            self.queue.push_back(frame);
            None
        }
    }

    /// Dispatch one inbound text frame
    pub fn on_frame(&mut self, text: &str) {
        let frame = match InboundFrame::decode(text, self.markers) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping frame: {}", e);
                return;
            }
        };
        debug!(kind = frame.kind(), "inbound frame");

        match frame {
            InboundFrame::Model(diff) => {
                let result = self
                    .mirror
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .apply(&diff);
                match result {
                    Ok(()) => self.mark_ready(),
                    Err(e) => error!("model patch failed, mirror may be inconsistent: {}", e),
                }
            }
            InboundFrame::Event { name, payload } => {
                emit(&self.listeners, &mut Event::new(name, payload));
            }
            InboundFrame::Invoke { name, args } => match self.commands.resolve(&name) {
                Some(handler) => handler(args),
                None => warn!("unknown command {:?} dropped", name),
            },
            InboundFrame::Response { id, outcome } => {
                if !self.correlation.complete(id, outcome) {
                    warn!(id, "response for unknown call id");
                }
            }
        }
    }

    fn mark_ready(&mut self) {
        if self.ready {
            return;
        }
        self.ready = true;
        info!("initial model received");
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// The transport closed with `code`
    pub fn on_closed(&mut self, code: CloseCode) -> Transition {
        if code.is_abnormal() {
            warn!(%code, "connection lost");
            self.reconnecting = true;
            self.set_state(ChannelState::Connecting);
            match self.reconnector.connection_lost() {
                ReconnectDecision::RetryAfter(delay) => Transition::ReconnectAfter(delay),
                ReconnectDecision::GiveUp => self.terminate(),
            }
        } else {
            info!(%code, "connection closed");
            self.reconnecting = false;
            self.set_state(ChannelState::Disconnected);
            self.reject_waiters(ChannelError::Disconnected);
            Transition::Idle
        }
    }

    /// Opening a transport failed
    ///
    /// During an outage this counts as one failed attempt; on a first
    /// connect it is terminal.
    pub fn on_connect_failed(&mut self, err: &NetworkError) -> Transition {
        if !self.reconnecting {
            error!("connect failed: {}", err);
            return self.terminate();
        }
        match self.reconnector.attempt_failed() {
            ReconnectDecision::RetryAfter(delay) => {
                warn!(
                    attempt = self.reconnector.failed_attempts(),
                    "reconnect failed: {}", err
                );
                Transition::ReconnectAfter(delay)
            }
            ReconnectDecision::GiveUp => {
                error!(
                    attempts = self.reconnector.failed_attempts(),
                    "giving up reconnecting: {}", err
                );
                self.terminate()
            }
        }
    }

    /// The transport reported an error that is not a close
    pub fn on_transport_error(&mut self, err: &NetworkError) -> Transition {
        error!("transport error: {}", err);
        self.terminate()
    }

    fn terminate(&mut self) -> Transition {
        if self.state == ChannelState::Terminated {
            return Transition::Idle;
        }
        self.reconnecting = false;
        self.set_state(ChannelState::Terminated);
        self.reject_waiters(ChannelError::Terminated);
        self.correlation.reject_all(ChannelError::Terminated);
        self.queue.clear();

        let mut event = Event::new(PROCESS_TERMINATED_EVENT, Value::Null);
        emit(&self.listeners, &mut event);
        if !event.is_default_prevented() {
            (self.default_action)(&self.terminated_notice);
        }
        Transition::Idle
    }

    fn reject_waiters(&mut self, error: ChannelError) {
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Host is shutting the channel down; returns the notice to send if open
    pub fn begin_shutdown(&mut self) -> Option<String> {
        let was_open = self.state == ChannelState::Open;
        if self.state != ChannelState::Terminated {
            self.set_state(ChannelState::Closing);
        }
        if !was_open {
            return None;
        }
        OutboundFrame::Notify {
            name: TERMINATION_NOTICE.to_string(),
        }
        .encode()
        .ok()
    }

    /// Shutdown done; fails everything still outstanding
    pub fn finish_shutdown(&mut self) {
        self.reject_waiters(ChannelError::Shutdown);
        self.correlation.reject_all(ChannelError::Shutdown);
        self.queue.clear();
        if self.state != ChannelState::Terminated {
            self.set_state(ChannelState::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandTable;
    use crate::correlation::CallReply;
    use crate::reconnect::ReconnectPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        session: Session,
        mirror: Arc<RwLock<Mirror>>,
        listeners: Arc<Mutex<ListenerRegistry>>,
        defaults: Arc<AtomicUsize>,
        invoked: Arc<Mutex<Vec<Value>>>,
    }

    fn harness() -> Harness {
        let mirror = Arc::new(RwLock::new(Mirror::new()));
        let listeners = Arc::new(Mutex::new(ListenerRegistry::new()));
        let defaults = Arc::new(AtomicUsize::new(0));
        let invoked = Arc::new(Mutex::new(Vec::new()));

        let sink = invoked.clone();
        let commands = CommandTable::new().with("alert", move |args| sink.lock().unwrap().extend(args));
        let counter = defaults.clone();
        let (session, _) = Session::new(SessionParts {
            markers: Markers::Underscore,
            terminated_notice: "gone".to_string(),
            reconnector: Reconnector::new(ReconnectPolicy {
                max_attempts: 2,
                ..ReconnectPolicy::default()
            }),
            mirror: mirror.clone(),
            listeners: listeners.clone(),
            commands: Arc::new(commands),
            default_action: Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        });
        Harness {
            session,
            mirror,
            listeners,
            defaults,
            invoked,
        }
    }

    fn connect(session: &mut Session) -> oneshot::Receiver<Result<(), ChannelError>> {
        let (tx, rx) = oneshot::channel();
        assert!(session.begin_connect(tx));
        rx
    }

    #[test]
    fn test_queue_flushes_in_order_with_original_ids() {
        let mut h = harness();
        let _ready = connect(&mut h.session);

        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert!(h.session.call(Call::method("a", vec![]), tx1).is_none());
        assert!(h.session.call(Call::method("b", vec![]), tx2).is_none());
        assert_eq!(h.session.queued(), 2);

        let flushed = h.session.on_open();
        let ids: Vec<u64> = flushed
            .iter()
            .map(|f| serde_json::from_str::<Value>(f).unwrap()["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(h.session.queued(), 0);

        let (tx3, _rx3) = oneshot::channel();
        let sent = h.session.call(Call::method("c", vec![]), tx3).expect("sent directly");
        assert!(sent.contains(r#""id":3"#));
    }

    #[test]
    fn test_requeue_preserves_order() {
        let mut h = harness();
        let _ready = connect(&mut h.session);
        for name in ["a", "b", "c"] {
            let (tx, _rx) = oneshot::channel();
            h.session.call(Call::method(name, vec![]), tx);
        }
        let mut flushed = h.session.on_open();
        // First frame went out, the second failed
        let unsent = flushed.split_off(1);
        h.session.on_closed(CloseCode::ABNORMAL);
        h.session.requeue_front(unsent);
        let (tx, _rx) = oneshot::channel();
        h.session.call(Call::method("d", vec![]), tx);

        let names: Vec<String> = h
            .session
            .on_open()
            .iter()
            .map(|f| serde_json::from_str::<Value>(f).unwrap()["n"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_first_model_resolves_readiness_once() {
        let mut h = harness();
        let mut ready = connect(&mut h.session);
        h.session.on_open();
        assert!(ready.try_recv().is_err());

        h.session.on_frame(r#"{"m": {"_id": 1, "count": 1}}"#);
        assert_eq!(ready.try_recv().unwrap(), Ok(()));
        assert_eq!(h.mirror.read().unwrap().pointer("/count"), Some(&json!(1)));

        // Later connect calls resolve immediately
        let (tx, mut rx) = oneshot::channel();
        assert!(!h.session.begin_connect(tx));
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_connect_after_clean_close_waits_for_new_model() {
        let mut h = harness();
        let _first = connect(&mut h.session);
        h.session.on_open();
        h.session.on_frame(r#"{"m": {"_id": 1}}"#);
        assert!(h.session.is_ready());
        h.session.on_closed(CloseCode::NORMAL);

        let mut again = connect(&mut h.session);
        assert!(!h.session.is_ready());
        assert!(again.try_recv().is_err());

        h.session.on_open();
        h.session.on_frame(r#"{"m": {"_id": 2}}"#);
        assert_eq!(again.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_bad_patch_does_not_mark_ready() {
        let mut h = harness();
        let mut ready = connect(&mut h.session);
        h.session.on_open();

        h.session.on_frame(r#"{"m": {"missing": {"x": 1}}}"#);
        assert!(!h.session.is_ready());
        assert!(ready.try_recv().is_err());
    }

    #[test]
    fn test_response_completes_call() {
        let mut h = harness();
        let _ready = connect(&mut h.session);
        h.session.on_open();

        let (tx, mut rx) = oneshot::channel();
        h.session.call(Call::method("sum", vec![json!(1), json!(2)]), tx);
        h.session.on_frame(r#"{"id": 1, "v": 3}"#);
        assert_eq!(rx.try_recv().unwrap(), Ok(CallReply::Single(json!(3))));
        assert_eq!(h.session.pending_calls(), 0);

        // Unknown ids are ignored
        h.session.on_frame(r#"{"id": 1, "v": 3}"#);
        h.session.on_frame(r#"{"id": 77}"#);
        assert_eq!(h.session.pending_calls(), 0);
    }

    #[test]
    fn test_invoke_and_unknown_command() {
        let mut h = harness();
        h.session.on_frame(r#"{"f": "alert", "a": ["hi"]}"#);
        h.session.on_frame(r#"{"f": "format_disk", "a": []}"#);
        assert_eq!(*h.invoked.lock().unwrap(), vec![json!("hi")]);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let mut h = harness();
        h.session.on_frame("{{");
        h.session.on_frame(r#"{"zzz": 1}"#);
        assert_eq!(h.session.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_clean_close_rejects_waiters_without_reconnect() {
        let mut h = harness();
        let mut ready = connect(&mut h.session);
        h.session.on_open();

        assert_eq!(h.session.on_closed(CloseCode::NORMAL), Transition::Idle);
        assert_eq!(h.session.state(), ChannelState::Disconnected);
        assert_eq!(ready.try_recv().unwrap(), Err(ChannelError::Disconnected));
    }

    #[test]
    fn test_outage_exhaustion_terminates_once() {
        let mut h = harness();
        let terminations = Arc::new(AtomicUsize::new(0));
        let seen = terminations.clone();
        h.listeners.lock().unwrap().subscribe(
            PROCESS_TERMINATED_EVENT,
            Arc::new(move |_: &mut Event| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut ready = connect(&mut h.session);
        h.session.on_open();
        let (tx, mut call) = oneshot::channel();
        h.session.call(Call::method("slow", vec![]), tx);

        assert_eq!(
            h.session.on_closed(CloseCode::ABNORMAL),
            Transition::ReconnectAfter(Duration::from_secs(1))
        );
        let refused = NetworkError::ConnectionFailed("refused".to_string());
        assert_eq!(
            h.session.on_connect_failed(&refused),
            Transition::ReconnectAfter(Duration::from_secs(5))
        );
        assert_eq!(h.session.on_connect_failed(&refused), Transition::Idle);

        assert_eq!(h.session.state(), ChannelState::Terminated);
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert_eq!(h.defaults.load(Ordering::SeqCst), 1);
        assert_eq!(ready.try_recv().unwrap(), Err(ChannelError::Terminated));
        assert_eq!(call.try_recv().unwrap(), Err(ChannelError::Terminated));

        // Calls after termination fail straight away
        let (tx, mut rx) = oneshot::channel();
        assert!(h.session.call(Call::method("late", vec![]), tx).is_none());
        assert_eq!(rx.try_recv().unwrap(), Err(ChannelError::Terminated));
        assert_eq!(h.session.queued(), 0);
    }

    #[test]
    fn test_prevent_default_skips_default_action() {
        let mut h = harness();
        h.listeners.lock().unwrap().subscribe(
            PROCESS_TERMINATED_EVENT,
            Arc::new(|event: &mut Event| event.prevent_default()),
        );
        let _ready = connect(&mut h.session);
        h.session
            .on_transport_error(&NetworkError::TransportError("reset".to_string()));

        assert_eq!(h.session.state(), ChannelState::Terminated);
        assert_eq!(h.defaults.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_initial_connect_failure_is_terminal() {
        let mut h = harness();
        let mut ready = connect(&mut h.session);
        let t = h
            .session
            .on_connect_failed(&NetworkError::ConnectionFailed("refused".to_string()));
        assert_eq!(t, Transition::Idle);
        assert_eq!(h.session.state(), ChannelState::Terminated);
        assert_eq!(ready.try_recv().unwrap(), Err(ChannelError::Terminated));
    }

    #[test]
    fn test_shutdown_sends_notice_only_when_open() {
        let mut h = harness();
        assert_eq!(h.session.begin_shutdown(), None);

        let mut h = harness();
        let _ready = connect(&mut h.session);
        h.session.on_open();
        assert_eq!(
            h.session.begin_shutdown().as_deref(),
            Some(r#"{"n":"goui:gui_terminated"}"#)
        );
        h.session.finish_shutdown();
        assert_eq!(h.session.state(), ChannelState::Disconnected);
    }
}
