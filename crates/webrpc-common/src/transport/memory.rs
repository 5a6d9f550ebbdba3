//! In-Memory Paired Channel
//!
//! Two linked channels for tests: frames written to one side arrive on the
//! other, optionally after a fixed delivery delay, and the readiness and
//! state-loss edges can be driven manually to exercise recovery paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};

use crate::protocol::{Result, WebrpcError};
use crate::transport::channel::Channel;
use crate::BoxFuture;

/// One side of an in-memory channel pair.
pub struct MemoryChannel {
    peer_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    ready_tx: watch::Sender<bool>,
    lost_tx: broadcast::Sender<String>,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Creates a linked pair delivering frames immediately.
    pub fn pair() -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        Self::pair_inner(None)
    }

    /// Creates a linked pair delivering each frame after `delay`, in order.
    ///
    /// Must be called within a tokio runtime; each direction runs a
    /// forwarding task that preserves FIFO order.
    pub fn pair_with_delay(delay: Duration) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        Self::pair_inner(Some(delay))
    }

    fn pair_inner(delay: Option<Duration>) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
        let (a_tx, a_rx) = Self::link(delay);
        let (b_tx, b_rx) = Self::link(delay);
        let a = Arc::new(Self::new(a_tx, b_rx));
        let b = Arc::new(Self::new(b_tx, a_rx));
        (a, b)
    }

    /// One direction of the pair: a sender whose frames surface on the
    /// returned receiver, through a delaying forwarder when configured.
    fn link(
        delay: Option<Duration>,
    ) -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        match delay {
            None => mpsc::unbounded_channel(),
            Some(delay) => {
                let (tx, mut mid_rx) = mpsc::unbounded_channel::<String>();
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                tokio::spawn(async move {
                    while let Some(frame) = mid_rx.recv().await {
                        tokio::time::sleep(delay).await;
                        if out_tx.send(frame).is_err() {
                            break;
                        }
                    }
                });
                (tx, out_rx)
            }
        }
    }

    fn new(
        peer_tx: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(true);
        let (lost_tx, _) = broadcast::channel(16);
        Self {
            peer_tx: Mutex::new(Some(peer_tx)),
            inbound: Mutex::new(Some(inbound)),
            ready_tx,
            lost_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Drives the readiness edge. Re-raising readiness after a loss lets
    /// recovery tests observe the ready edge.
    pub fn set_ready(&self, ready: bool) {
        self.ready_tx.send_replace(ready);
    }

    /// Transitions out of ready and emits a single state-loss notification.
    pub fn lose_state(&self, reason: &str) {
        let was_ready = self.ready_tx.send_replace(false);
        if was_ready {
            let _ = self.lost_tx.send(reason.to_string());
        }
    }

    /// Emits a state-loss notification regardless of the current state.
    ///
    /// Well-behaved channels report one loss per transition; this driver
    /// exists so tests can exercise consumers against pathological edge
    /// storms.
    pub fn force_state_loss(&self, reason: &str) {
        self.ready_tx.send_replace(false);
        let _ = self.lost_tx.send(reason.to_string());
    }
}

impl Channel for MemoryChannel {
    fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inbound.lock().expect("inbound lock poisoned").take()
    }

    fn send(&self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut ready = self.ready_tx.subscribe();
            ready
                .wait_for(|ready| *ready)
                .await
                .map_err(|_| WebrpcError::ChannelClosed)?;
            if self.closed.load(Ordering::SeqCst) {
                return Err(WebrpcError::ChannelClosed);
            }
            let sender = self.peer_tx.lock().expect("peer lock poisoned").clone();
            match sender {
                Some(sender) => sender
                    .send(frame)
                    .map_err(|_| WebrpcError::ChannelClosed),
                None => Err(WebrpcError::ChannelClosed),
            }
        })
    }

    fn ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    fn state_lost(&self) -> broadcast::Receiver<String> {
        self.lost_tx.subscribe()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.peer_tx.lock().expect("peer lock poisoned").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_the_pair() {
        let (a, b) = MemoryChannel::pair();
        let mut frames = b.take_frames().unwrap();
        a.send("hello".to_string()).await.unwrap();
        assert_eq!(frames.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_frames_taken_once() {
        let (a, _b) = MemoryChannel::pair();
        assert!(a.take_frames().is_some());
        assert!(a.take_frames().is_none());
    }

    #[tokio::test]
    async fn test_send_suspends_until_ready() {
        let (a, b) = MemoryChannel::pair();
        a.set_ready(false);
        let mut frames = b.take_frames().unwrap();

        let sender = a.clone();
        let task = tokio::spawn(async move { sender.send("queued".to_string()).await });

        // Not delivered while unready.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(frames.try_recv().is_err());

        a.set_ready(true);
        task.await.unwrap().unwrap();
        assert_eq!(frames.recv().await.unwrap(), "queued");
    }

    #[tokio::test]
    async fn test_state_loss_emits_once_per_transition() {
        let (a, _b) = MemoryChannel::pair();
        let mut lost = a.state_lost();
        a.lose_state("first");
        a.lose_state("still down");
        a.set_ready(true);
        a.lose_state("second");

        assert_eq!(lost.recv().await.unwrap(), "first");
        assert_eq!(lost.recv().await.unwrap(), "second");
        assert!(lost.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_ready_subscriber_sees_current_state() {
        let (a, _b) = MemoryChannel::pair();
        a.set_ready(false);
        let ready = a.ready();
        assert!(!*ready.borrow());
    }

    #[tokio::test]
    async fn test_delayed_pair_preserves_order() {
        let (a, b) = MemoryChannel::pair_with_delay(Duration::from_millis(10));
        let mut frames = b.take_frames().unwrap();
        a.send("one".to_string()).await.unwrap();
        a.send("two".to_string()).await.unwrap();
        assert_eq!(frames.recv().await.unwrap(), "one");
        assert_eq!(frames.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_send() {
        let (a, _b) = MemoryChannel::pair();
        a.close();
        let err = a.send("frame".to_string()).await.unwrap_err();
        assert!(matches!(err, WebrpcError::ChannelClosed));
    }
}
