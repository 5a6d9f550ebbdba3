use tokio::sync::{broadcast, mpsc, watch};

use crate::protocol::Result;
use crate::BoxFuture;

/// Abstract duplex message transport.
///
/// Implementations emit received text frames, accept frames for sending,
/// and optionally signal readiness and state loss. The default `ready`
/// implementation reports permanently ready and the default `state_lost`
/// never fires, matching transports that cannot lose state (such as the
/// in-memory pair in its plain configuration).
pub trait Channel: Send + Sync + 'static {
    /// Takes ownership of the inbound frame stream.
    ///
    /// The session is the only frame consumer, so this returns the receiver
    /// once; subsequent calls return `None`.
    fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<String>>;

    /// Sends a frame, suspending until the channel is ready if necessary.
    fn send(&self, frame: String) -> BoxFuture<'_, Result<()>>;

    /// Current readiness, observable by late subscribers.
    ///
    /// After state loss this must not report `true` until the transport is
    /// re-established.
    fn ready(&self) -> watch::Receiver<bool> {
        // Permanently-ready channels keep a sender alive so the receiver
        // never observes a close.
        static READY: std::sync::OnceLock<(watch::Sender<bool>, watch::Receiver<bool>)> =
            std::sync::OnceLock::new();
        READY.get_or_init(|| watch::channel(true)).1.clone()
    }

    /// State-loss notifications, one per ready-to-not-ready transition.
    ///
    /// The default receiver never yields; subscribers treat a closed
    /// channel as "no loss will ever be reported".
    fn state_lost(&self) -> broadcast::Receiver<String> {
        broadcast::channel(1).1
    }

    /// Graceful shutdown. Optional; the default is a no-op.
    fn close(&self) {}
}

/// Convenience operations over any [`Channel`].
pub trait ChannelExt: Channel {
    /// Suspends until `ready` reports `true`.
    fn wait_ready(&self) -> BoxFuture<'_, Result<()>> {
        let mut ready = self.ready();
        Box::pin(async move {
            ready
                .wait_for(|ready| *ready)
                .await
                .map_err(|_| crate::protocol::WebrpcError::ChannelClosed)?;
            Ok(())
        })
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}
