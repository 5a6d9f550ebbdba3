//! The Service-Proxy Façade
//!
//! A front-end for applications that want an always-available handle over
//! an unreliable transport. The façade returns immediately; the first call
//! resolves the channel (which may itself still be pending), waits for its
//! ready edge, acquires the remote service handle, and remembers it. On
//! state loss the handle is dropped and the next call re-acquires it,
//! replaying every recorded event subscription exactly once before
//! continuing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use webrpc_common::{BoxFuture, Channel, ChannelExt, Result, WebrpcError};
use webrpc_session::{Observer, RemoteObject, RemoteSubscriptionHandle, RpcValue, Session};

struct SubscriptionRecord {
    event: String,
    observer: Observer,
    remote: RemoteSubscriptionHandle,
}

struct ClientState {
    handle: Option<RemoteObject>,
    subscriptions: HashMap<u64, SubscriptionRecord>,
    next_subscription: u64,
    /// A failed replay is remembered and surfaced on the next call.
    fatal: Option<String>,
}

/// A channel source the façade has not resolved yet.
enum PendingLink {
    Ready(Arc<dyn Channel>, Option<Session>),
    Future(BoxFuture<'static, Arc<dyn Channel>>),
}

/// The resolved channel and its session.
struct Link {
    channel: Arc<dyn Channel>,
    session: Session,
}

struct ClientInner {
    service_name: String,
    link: tokio::sync::OnceCell<Link>,
    pending: Mutex<Option<PendingLink>>,
    state: tokio::sync::Mutex<ClientState>,
}

/// Always-available handle to one remote service.
///
/// Cheap to clone; all clones share the remembered service handle and the
/// subscription ledger.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl ServiceClient {
    /// Wraps a channel, creating a fresh session for it on first use.
    pub fn new(service_name: impl Into<String>, channel: Arc<dyn Channel>) -> Self {
        Self::from_source(service_name, PendingLink::Ready(channel, None))
    }

    /// Wraps an existing session over the given channel. Use this to share
    /// one session between several façades on the same channel.
    pub fn with_session(
        service_name: impl Into<String>,
        channel: Arc<dyn Channel>,
        session: Session,
    ) -> Self {
        Self::from_source(service_name, PendingLink::Ready(channel, Some(session)))
    }

    /// Wraps a channel that is still being established. The façade is
    /// usable immediately; the first call awaits the channel.
    pub fn from_pending<F>(service_name: impl Into<String>, channel: F) -> Self
    where
        F: Future<Output = Arc<dyn Channel>> + Send + 'static,
    {
        Self::from_source(service_name, PendingLink::Future(Box::pin(channel)))
    }

    fn from_source(service_name: impl Into<String>, source: PendingLink) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                service_name: service_name.into(),
                link: tokio::sync::OnceCell::new(),
                pending: Mutex::new(Some(source)),
                state: tokio::sync::Mutex::new(ClientState {
                    handle: None,
                    subscriptions: HashMap::new(),
                    next_subscription: 0,
                    fatal: None,
                }),
            }),
        }
    }

    /// Resolves the channel and session, once, and starts the state-loss
    /// watcher for the lifetime of the façade.
    async fn link(&self) -> &Link {
        self.inner
            .link
            .get_or_init(|| async {
                let source = self
                    .inner
                    .pending
                    .lock()
                    .expect("pending link lock poisoned")
                    .take()
                    .expect("channel source resolved twice");
                let (channel, session) = match source {
                    PendingLink::Ready(channel, Some(session)) => (channel, session),
                    PendingLink::Ready(channel, None) => {
                        let session = Session::new(channel.clone());
                        (channel, session)
                    }
                    PendingLink::Future(future) => {
                        let channel = future.await;
                        let session = Session::new(channel.clone());
                        (channel, session)
                    }
                };
                Self::spawn_state_loss_watcher(&self.inner, &channel);
                Link { channel, session }
            })
            .await
    }

    /// Drops the remembered handle on every state-loss edge. Repeated
    /// edges before the next ready edge are collapsed: the handle is
    /// already gone, so recovery still replays each subscription once.
    fn spawn_state_loss_watcher(inner: &Arc<ClientInner>, channel: &Arc<dyn Channel>) {
        let watcher = Arc::downgrade(inner);
        let mut lost = channel.state_lost();
        tokio::spawn(async move {
            while let Ok(reason) = lost.recv().await {
                let Some(inner) = watcher.upgrade() else { return };
                warn!(service = %inner.service_name, reason = %reason, "channel state lost; dropping service handle");
                inner.state.lock().await.handle = None;
            }
        });
    }

    /// The session this façade rides on, resolving the channel first if
    /// necessary.
    pub async fn session(&self) -> &Session {
        &self.link().await.session
    }

    /// Invokes a method on the service, acquiring or re-acquiring the
    /// handle first if needed.
    pub async fn call(&self, method: &str, params: Vec<RpcValue>) -> Result<RpcValue> {
        let handle = self.acquire().await?;
        handle.call(method, params).await
    }

    /// Subscribes to a named event on the service. The subscription is
    /// recorded so it survives state loss; unsubscribing through the
    /// returned handle removes the record as well.
    pub async fn subscribe<F>(&self, event: &str, observer: F) -> Result<FacadeSubscription>
    where
        F: Fn(RpcValue) + Send + Sync + 'static,
    {
        let handle = self.acquire().await?;
        let observer: Observer = Arc::new(observer);
        let forwarded = observer.clone();
        let remote = handle
            .subscribe(event, move |value| forwarded(value))
            .await?;

        let mut state = self.inner.state.lock().await;
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.subscriptions.insert(
            id,
            SubscriptionRecord {
                event: event.to_string(),
                observer,
                remote,
            },
        );
        Ok(FacadeSubscription {
            id,
            client: self.clone(),
        })
    }

    /// Waits for readiness, fetches the service handle and replays
    /// recorded subscriptions if the handle had been lost.
    async fn acquire(&self) -> Result<RemoteObject> {
        let link = self.link().await;
        let mut state = self.inner.state.lock().await;
        if let Some(fatal) = &state.fatal {
            return Err(WebrpcError::Resubscribe(fatal.clone()));
        }
        if let Some(handle) = &state.handle {
            return Ok(handle.clone());
        }

        // Calls made during an outage pile up here until the ready edge.
        link.channel.wait_ready().await?;

        let handle = link
            .session
            .get_remote_service(&self.inner.service_name)
            .await?
            .ok_or_else(|| WebrpcError::NoSuchService(self.inner.service_name.clone()))?;

        let mut failure = None;
        for (id, record) in state.subscriptions.iter_mut() {
            debug!(service = %self.inner.service_name, event = %record.event, "replaying subscription");
            let observer = record.observer.clone();
            match handle
                .subscribe(&record.event, move |value| observer(value))
                .await
            {
                Ok(remote) => record.remote = remote,
                Err(replay_error) => {
                    failure = Some(format!(
                        "could not replay subscription {} to '{}': {}",
                        id, record.event, replay_error
                    ));
                    break;
                }
            }
        }
        if let Some(fatal) = failure {
            state.fatal = Some(fatal.clone());
            return Err(WebrpcError::Resubscribe(fatal));
        }

        state.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn unsubscribe(&self, id: u64) -> Result<()> {
        let record = self.inner.state.lock().await.subscriptions.remove(&id);
        match record {
            Some(record) => record.remote.unsubscribe().await,
            None => Ok(()),
        }
    }
}

/// Handle to a subscription made through the façade.
pub struct FacadeSubscription {
    id: u64,
    client: ServiceClient,
}

impl FacadeSubscription {
    /// Cancels the remote subscription and removes it from the replay
    /// ledger.
    pub async fn unsubscribe(self) -> Result<()> {
        self.client.unsubscribe(self.id).await
    }
}
