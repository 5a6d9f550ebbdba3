//! Short-Lived Socket Abstraction
//!
//! A [`SocketConnector`] produces connected, short-lived sockets; the
//! durable endpoint wraps one to present a long-lived connection. Each
//! socket is a pair of frame streams: an outgoing sender whose drop closes
//! the connection, and an incoming receiver of text frames and the final
//! close notification.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use webrpc_common::{BoxFuture, Result, WebrpcError};

/// Maximum frame size (100 MB), to prevent memory exhaustion on a
/// corrupted length prefix.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// An event surfaced by a connected socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One inbound text frame
    Message(String),
    /// The socket closed, with a human-readable reason
    Closed(String),
}

/// A connected socket as a pair of frame streams.
pub struct SocketHandle {
    /// Frames to put on the wire; dropping the sender closes the socket
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Inbound frames and the final close notification
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Factory for short-lived sockets.
pub trait SocketConnector: Send + Sync + 'static {
    /// Establishes one connection to the given URL.
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<SocketHandle>>;
}

/// TCP connector speaking length-prefixed UTF-8 JSON frames.
///
/// Wire format: `[4-byte length as u32 big-endian] + [frame bytes]`.
/// Accepts `tcp://host:port` URLs as well as bare `host:port` addresses.
pub struct TcpConnector;

impl TcpConnector {
    fn address(url: &str) -> &str {
        let trimmed = url.strip_prefix("tcp://").unwrap_or(url);
        // Query parameters (such as the session id) are not part of the
        // dial address.
        trimmed.split('?').next().unwrap_or(trimmed)
    }
}

impl SocketConnector for TcpConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<SocketHandle>> {
        Box::pin(async move {
            let stream = TcpStream::connect(Self::address(url))
                .await
                .map_err(WebrpcError::Io)?;
            let (mut read_half, mut write_half) = stream.into_split();

            let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
            let (incoming_tx, incoming) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(frame) = outgoing_rx.recv().await {
                    let bytes = frame.as_bytes();
                    let len = (bytes.len() as u32).to_be_bytes();
                    if write_half.write_all(&len).await.is_err()
                        || write_half.write_all(bytes).await.is_err()
                        || write_half.flush().await.is_err()
                    {
                        break;
                    }
                }
                let _ = write_half.shutdown().await;
            });

            tokio::spawn(async move {
                loop {
                    let mut len_buf = [0u8; 4];
                    if let Err(read_error) = read_half.read_exact(&mut len_buf).await {
                        let _ = incoming_tx
                            .send(SocketEvent::Closed(format!("connection lost: {}", read_error)));
                        return;
                    }
                    let len = u32::from_be_bytes(len_buf) as usize;
                    if len > MAX_FRAME_SIZE {
                        let _ = incoming_tx.send(SocketEvent::Closed(format!(
                            "frame too large: {} bytes (max {} bytes)",
                            len, MAX_FRAME_SIZE
                        )));
                        return;
                    }
                    let mut buf = vec![0u8; len];
                    if let Err(read_error) = read_half.read_exact(&mut buf).await {
                        let _ = incoming_tx
                            .send(SocketEvent::Closed(format!("connection lost: {}", read_error)));
                        return;
                    }
                    match String::from_utf8(buf) {
                        Ok(frame) => {
                            if incoming_tx.send(SocketEvent::Message(frame)).is_err() {
                                return;
                            }
                        }
                        Err(_) => {
                            debug!("dropping non-UTF-8 frame");
                        }
                    }
                }
            });

            Ok(SocketHandle { outgoing, incoming })
        })
    }
}

/// The far end of a [`MemoryConnector`] socket, handed to the test driving
/// the server side.
pub struct ServerSocket {
    /// The URL the client dialed, including any session-id parameter
    pub url: String,
    /// Pushes frames (or the close notification) to the client
    pub tx: mpsc::UnboundedSender<SocketEvent>,
    /// Frames the client wrote
    pub rx: mpsc::UnboundedReceiver<String>,
}

/// In-memory connector for tests: every `connect` yields a fresh socket
/// whose server side pops out of the accept queue.
pub struct MemoryConnector {
    accepts_tx: mpsc::UnboundedSender<ServerSocket>,
}

impl MemoryConnector {
    /// Creates the connector plus the accept queue for the test to drive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSocket>) {
        let (accepts_tx, accepts_rx) = mpsc::unbounded_channel();
        (Self { accepts_tx }, accepts_rx)
    }
}

impl SocketConnector for MemoryConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<SocketHandle>> {
        Box::pin(async move {
            let (outgoing, rx) = mpsc::unbounded_channel();
            let (tx, incoming) = mpsc::unbounded_channel();
            let server = ServerSocket {
                url: url.to_string(),
                tx,
                rx,
            };
            self.accepts_tx
                .send(server)
                .map_err(|_| WebrpcError::ChannelClosed)?;
            Ok(SocketHandle { outgoing, incoming })
        })
    }
}
