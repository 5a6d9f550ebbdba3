//! Channel Adapter
//!
//! Adapts a [`DurableSocket`] to the session-facing
//! [`Channel`](webrpc_common::Channel) capability: `lost` events become
//! state-loss notifications and the connected edge drives readiness.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use webrpc_common::{BoxFuture, Channel, Result};

use crate::durable::{DurableSocket, DurableSocketEvent};

/// A [`Channel`] backed by a reconnecting durable socket.
pub struct SocketChannel {
    socket: DurableSocket,
    lost_tx: broadcast::Sender<String>,
}

impl SocketChannel {
    /// Wraps a durable socket.
    pub fn new(socket: DurableSocket) -> Arc<Self> {
        let (lost_tx, _) = broadcast::channel(16);
        let forward = lost_tx.clone();
        let mut events = socket.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DurableSocketEvent::Lost(reason)) => {
                        let _ = forward.send(reason);
                    }
                    Ok(DurableSocketEvent::Close { .. }) | Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        });
        Arc::new(Self { socket, lost_tx })
    }

    /// The wrapped durable socket.
    pub fn socket(&self) -> &DurableSocket {
        &self.socket
    }
}

impl Channel for SocketChannel {
    fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.socket.take_messages()
    }

    /// Enqueues the frame; the durable send queue drains on the next open,
    /// so sends never drop during an outage.
    fn send(&self, frame: String) -> BoxFuture<'_, Result<()>> {
        let outcome = self.socket.send(frame);
        Box::pin(async move { outcome })
    }

    fn ready(&self) -> watch::Receiver<bool> {
        self.socket.ready()
    }

    fn state_lost(&self) -> broadcast::Receiver<String> {
        self.lost_tx.subscribe()
    }

    fn close(&self) {
        self.socket.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::DurableSocketOptions;
    use crate::socket::{MemoryConnector, SocketEvent};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lost_event_becomes_state_loss() {
        let (connector, mut accepts) = MemoryConnector::new();
        let options = DurableSocketOptions {
            reconnect_time: Duration::from_millis(5),
            enable_ping: false,
            ..DurableSocketOptions::default()
        };
        let socket = DurableSocket::with_options(Arc::new(connector), "mem://a", options);
        let channel = SocketChannel::new(socket);
        let mut lost = channel.state_lost();

        let server = accepts.recv().await.unwrap();
        server
            .tx
            .send(SocketEvent::Closed("wire cut".into()))
            .unwrap();

        assert_eq!(lost.recv().await.unwrap(), "wire cut");
        assert!(!*channel.ready().borrow());

        // Ready comes back with the reconnect.
        let _second = accepts.recv().await.unwrap();
        channel
            .ready()
            .wait_for(|ready| *ready)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_frames_flow_through_channel() {
        let (connector, mut accepts) = MemoryConnector::new();
        let options = DurableSocketOptions {
            enable_ping: false,
            ..DurableSocketOptions::default()
        };
        let socket = DurableSocket::with_options(Arc::new(connector), "mem://a", options);
        let channel = SocketChannel::new(socket);
        let mut frames = channel.take_frames().unwrap();

        let mut server = accepts.recv().await.unwrap();
        channel.send("up".to_string()).await.unwrap();
        assert_eq!(server.rx.recv().await.unwrap(), "up");

        server.tx.send(SocketEvent::Message("down".into())).unwrap();
        assert_eq!(frames.recv().await.unwrap(), "down");
    }
}
