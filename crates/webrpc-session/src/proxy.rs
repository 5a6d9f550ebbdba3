//! Remote Object Proxies
//!
//! A [`RemoteObject`] is the local stand-in for a remotable living on the
//! peer. Method access forwards as RPC calls through the owning session;
//! `subscribe` adapts an observer callback into an inline remotable and
//! routes it through the peer session's `subscribeToEvent`.
//!
//! The proxy is the identity carrier for distributed GC: each peer holds
//! at most one live proxy per remote object id, and dropping the last
//! handle starts the finalization debounce for the reference it carries.

use std::sync::Arc;

use webrpc_common::{RefDescriptor, Result};

use crate::session::Session;
use crate::subscription::{CallbackObserver, RemoteSubscriptionHandle};
use crate::value::RpcValue;

/// Clonable handle to a remote object.
///
/// All clones share one identity; the finalization debounce starts when
/// the last clone drops.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Arc<ProxyInner>,
}

/// Shared proxy state. Dropping the last strong holder notifies the
/// session so it can schedule `finalizeRef` for the carried reference.
pub(crate) struct ProxyInner {
    object_id: String,
    reference_id: Option<String>,
    session: Session,
}

impl ProxyInner {
    pub(crate) fn new(session: Session, object_id: String, reference_id: Option<String>) -> Self {
        Self {
            object_id,
            reference_id,
            session,
        }
    }

    pub(crate) fn object_id(&self) -> &str {
        &self.object_id
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        // Well-known references carry no reference id and have no lifetime
        // to manage.
        if let Some(reference_id) = self.reference_id.take() {
            self.session
                .notify_proxy_dropped(self.object_id.clone(), reference_id);
        }
    }
}

impl RemoteObject {
    pub(crate) fn from_inner(inner: Arc<ProxyInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ProxyInner> {
        &self.inner
    }

    /// The remote object id this proxy stands in for.
    pub fn object_id(&self) -> &str {
        &self.inner.object_id
    }

    /// The session that owns this proxy.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Invokes a method on the remote object.
    pub async fn call(&self, method: &str, params: Vec<RpcValue>) -> Result<RpcValue> {
        self.inner.session.call(self, method, params).await
    }

    /// Subscribes to a named event on the remote object.
    ///
    /// The observer is wrapped as an inline remotable with a `next` method
    /// and handed to the peer session's `subscribeToEvent`; the returned
    /// handle cancels the remote subscription.
    pub async fn subscribe<F>(&self, event: &str, observer: F) -> Result<RemoteSubscriptionHandle>
    where
        F: Fn(RpcValue) + Send + Sync + 'static,
    {
        let observer = CallbackObserver::new(observer);
        let subscription = self
            .inner
            .session
            .remote()
            .call(
                "subscribeToEvent",
                vec![
                    RpcValue::Proxy(self.clone()),
                    RpcValue::from(event),
                    RpcValue::object(observer),
                ],
            )
            .await?;
        match subscription {
            RpcValue::Proxy(proxy) => Ok(RemoteSubscriptionHandle::new(proxy)),
            other => Err(webrpc_common::WebrpcError::Decode(format!(
                "subscribeToEvent returned a non-reference value: {:?}",
                other
            ))),
        }
    }

    /// A fresh pass-back descriptor, so the proxy round-trips as a
    /// reference within arbitrary JSON payloads.
    pub fn descriptor(&self) -> RefDescriptor {
        RefDescriptor::remote(self.inner.object_id.clone())
    }

    /// Whether two handles stand in for the same proxy instance.
    pub fn same_proxy(&self, other: &RemoteObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("object_id", &self.inner.object_id)
            .field("reference_id", &self.inner.reference_id)
            .finish()
    }
}
