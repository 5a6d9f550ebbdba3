//! The Durable Socket
//!
//! Wraps a short-lived socket factory to present a long-lived endpoint:
//! exponential backoff with jitter between reconnect attempts, a FIFO send
//! queue that drains on every (re-)open, an application-level keep-alive,
//! and session-id continuity across reconnects.
//!
//! # Events
//!
//! - `open`: the first successful connect
//! - `lost`: any transition out of connected
//! - `restore`: any reconnect after the first open
//! - `close`: terminal, either explicit shutdown or fatal failure with
//!   code 503 after the configured attempt budget
//!
//! Message frames are surfaced through a separate stream; keep-alive and
//! session-control frames are consumed internally and never propagated.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use webrpc_common::{Result, WebrpcError};

use crate::socket::{SocketConnector, SocketEvent, SocketHandle};

/// Tuning knobs for the reconnect policy and keep-alive.
#[derive(Debug, Clone)]
pub struct DurableSocketOptions {
    /// Base reconnect delay
    pub reconnect_time: Duration,
    /// Upper bound on the reconnect delay
    pub max_reconnect_time: Duration,
    /// Multiplicative backoff factor per attempt
    pub backoff_factor: f64,
    /// Uniform random jitter fraction added to each delay
    pub jitter: f64,
    /// Consecutive failed attempts before fatal failure; 0 means infinite
    pub max_attempts: u32,
    /// Whether the application-level keep-alive runs
    pub enable_ping: bool,
    /// Interval between keep-alive pings
    pub ping_interval: Duration,
    /// Silence threshold after which the socket is treated as lost
    pub ping_keepalive_interval: Duration,
}

impl Default for DurableSocketOptions {
    fn default() -> Self {
        Self {
            reconnect_time: Duration::from_millis(500),
            max_reconnect_time: Duration::from_secs(30),
            backoff_factor: 1.5,
            jitter: 0.05,
            max_attempts: 0,
            enable_ping: true,
            ping_interval: Duration::from_secs(10),
            ping_keepalive_interval: Duration::from_secs(25),
        }
    }
}

/// Lifecycle events surfaced by a [`DurableSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableSocketEvent {
    /// First successful connect
    Open,
    /// Any transition out of connected, with the reason
    Lost(String),
    /// Any reconnect after the first open
    Restore,
    /// Terminal shutdown
    Close { code: u16, reason: String },
}

/// Fatal-failure code used when the attempt budget is exhausted.
pub const CLOSE_CODE_UNAVAILABLE: u16 = 503;
/// Close code for an orderly shutdown.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

struct DurableInner {
    ready_tx: watch::Sender<bool>,
    close_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<DurableSocketEvent>,
    messages_tx: mpsc::UnboundedSender<String>,
    messages_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    queue_tx: mpsc::UnboundedSender<String>,
    reconnect_tx: mpsc::UnboundedSender<()>,
    session_id: Mutex<Option<String>>,
}

impl DurableInner {
    fn emit(&self, event: DurableSocketEvent) {
        let _ = self.events_tx.send(event);
    }

    fn connect_url(&self, base: &str) -> String {
        let session_id = self
            .session_id
            .lock()
            .expect("session id lock poisoned")
            .clone();
        match session_id {
            Some(id) if base.contains('?') => format!("{}&sessionId={}", base, id),
            Some(id) => format!("{}?sessionId={}", base, id),
            None => base.to_string(),
        }
    }
}

/// Reconnecting endpoint over a [`SocketConnector`].
#[derive(Clone)]
pub struct DurableSocket {
    inner: Arc<DurableInner>,
}

impl DurableSocket {
    /// Connects with default options.
    pub fn new(connector: Arc<dyn SocketConnector>, url: impl Into<String>) -> Self {
        Self::with_options(connector, url, DurableSocketOptions::default())
    }

    /// Connects with explicit options.
    pub fn with_options(
        connector: Arc<dyn SocketConnector>,
        url: impl Into<String>,
        options: DurableSocketOptions,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (close_tx, _) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(32);
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(DurableInner {
            ready_tx,
            close_tx,
            events_tx,
            messages_tx,
            messages_rx: Mutex::new(Some(messages_rx)),
            queue_tx,
            reconnect_tx,
            session_id: Mutex::new(None),
        });
        tokio::spawn(run(
            inner.clone(),
            connector,
            url.into(),
            options,
            queue_rx,
            reconnect_rx,
        ));
        Self { inner }
    }

    /// Enqueues a frame. While not connected the frame waits in the queue
    /// and drains in FIFO order on the next open.
    pub fn send(&self, frame: String) -> Result<()> {
        if *self.inner.close_tx.borrow() {
            return Err(WebrpcError::ChannelClosed);
        }
        self.inner
            .queue_tx
            .send(frame)
            .map_err(|_| WebrpcError::ChannelClosed)
    }

    /// Takes ownership of the message stream (non-control frames only).
    pub fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inner
            .messages_rx
            .lock()
            .expect("messages lock poisoned")
            .take()
    }

    /// Readiness; resolves on every transition into connected and resets
    /// on every loss.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.inner.ready_tx.subscribe()
    }

    /// Lifecycle event stream.
    pub fn events(&self) -> broadcast::Receiver<DurableSocketEvent> {
        self.inner.events_tx.subscribe()
    }

    /// The server-assigned session id, once one has been received.
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .session_id
            .lock()
            .expect("session id lock poisoned")
            .clone()
    }

    /// Forcibly closes the underlying socket to trigger the reconnect
    /// path.
    pub fn reconnect(&self) {
        let _ = self.inner.reconnect_tx.send(());
    }

    /// Terminal shutdown.
    pub fn close(&self) {
        self.inner.close_tx.send_replace(true);
    }
}

/// Delay before reconnect attempt `attempt` (1-based): exponential from
/// the base time up to the cap, plus uniform random jitter.
fn backoff_delay(options: &DurableSocketOptions, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(64) as i32;
    let base = (options.reconnect_time.as_millis() as f64
        * options.backoff_factor.powi(exponent))
    .min(options.max_reconnect_time.as_millis() as f64);
    let jittered = base * (1.0 + rand::random::<f64>() * options.jitter);
    Duration::from_millis(jittered as u64)
}

/// Control frames consumed by the durable layer.
enum ControlFrame {
    Ping,
    Pong,
    SetSessionId(String),
    Payload,
}

fn classify(frame: &str) -> ControlFrame {
    let Ok(value) = serde_json::from_str::<Value>(frame) else {
        return ControlFrame::Payload;
    };
    match value.get("type").and_then(Value::as_str) {
        Some("ping") => ControlFrame::Ping,
        Some("pong") => ControlFrame::Pong,
        Some("setSessionId") => match value.get("id").and_then(Value::as_str) {
            Some(id) => ControlFrame::SetSessionId(id.to_string()),
            None => ControlFrame::Payload,
        },
        _ => ControlFrame::Payload,
    }
}

async fn run(
    inner: Arc<DurableInner>,
    connector: Arc<dyn SocketConnector>,
    url: String,
    options: DurableSocketOptions,
    mut queue_rx: mpsc::UnboundedReceiver<String>,
    mut reconnect_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut close_rx = inner.close_tx.subscribe();
    let mut first_open = true;
    let mut attempts: u32 = 0;
    // A frame accepted by a socket that died before writing it; sent first
    // after the next open so nothing is silently dropped.
    let mut carry: Option<String> = None;

    loop {
        // Connect, backing off between failures.
        let mut handle: SocketHandle = loop {
            if options.max_attempts > 0 && attempts >= options.max_attempts {
                inner.ready_tx.send_replace(false);
                inner.emit(DurableSocketEvent::Close {
                    code: CLOSE_CODE_UNAVAILABLE,
                    reason: format!("failed to connect after {} attempts", attempts),
                });
                return;
            }
            let connect_url = inner.connect_url(&url);
            match connector.connect(&connect_url).await {
                Ok(handle) => break handle,
                Err(connect_error) => {
                    attempts += 1;
                    let delay = backoff_delay(&options, attempts);
                    debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %connect_error,
                        "connect failed; backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = close_rx.wait_for(|closed| *closed) => {
                            inner.emit(DurableSocketEvent::Close {
                                code: CLOSE_CODE_NORMAL,
                                reason: "closed".into(),
                            });
                            return;
                        }
                    }
                }
            }
        };
        attempts = 0;

        if first_open {
            info!(url = %url, "connected");
            inner.emit(DurableSocketEvent::Open);
            first_open = false;
        } else {
            info!(url = %url, "connection restored");
            inner.emit(DurableSocketEvent::Restore);
        }
        inner.ready_tx.send_replace(true);

        if let Some(frame) = carry.take() {
            if handle.outgoing.send(frame.clone()).is_err() {
                carry = Some(frame);
            }
        }

        let mut last_pong = Instant::now();
        let mut ping_timer = tokio::time::interval(options.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let reason: String = loop {
            tokio::select! {
                frame = queue_rx.recv() => {
                    let Some(frame) = frame else { break "endpoint dropped".into() };
                    if handle.outgoing.send(frame.clone()).is_err() {
                        carry = Some(frame);
                        break "connection lost while sending".into();
                    }
                }
                event = handle.incoming.recv() => match event {
                    Some(SocketEvent::Message(frame)) => match classify(&frame) {
                        ControlFrame::Pong => last_pong = Instant::now(),
                        ControlFrame::Ping => {
                            let _ = handle.outgoing.send(r#"{"type":"pong"}"#.to_string());
                        }
                        ControlFrame::SetSessionId(id) => {
                            debug!(session_id = %id, "session id assigned");
                            *inner.session_id.lock().expect("session id lock poisoned") = Some(id);
                        }
                        ControlFrame::Payload => {
                            if inner.messages_tx.send(frame).is_err() {
                                break "message consumer dropped".into();
                            }
                        }
                    },
                    Some(SocketEvent::Closed(reason)) => break reason,
                    None => break "connection lost".into(),
                },
                _ = ping_timer.tick(), if options.enable_ping => {
                    if last_pong.elapsed() > options.ping_keepalive_interval {
                        break "keep-alive timeout".into();
                    }
                    let _ = handle.outgoing.send(r#"{"type":"ping"}"#.to_string());
                }
                _ = reconnect_rx.recv() => break "reconnect requested".into(),
                _ = close_rx.wait_for(|closed| *closed) => {
                    inner.ready_tx.send_replace(false);
                    inner.emit(DurableSocketEvent::Close {
                        code: CLOSE_CODE_NORMAL,
                        reason: "closed".into(),
                    });
                    return;
                }
            }
        };

        warn!(reason = %reason, "connection lost");
        inner.ready_tx.send_replace(false);
        inner.emit(DurableSocketEvent::Lost(reason));
        // Dropping the handle detaches the dead socket entirely; a close
        // event from a superseded socket can never reach this loop, so no
        // duplicate reconnect gets scheduled.
        drop(handle);
    }
}
