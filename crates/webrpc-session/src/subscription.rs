//! Event Subscription Plumbing
//!
//! Three pieces connect an [`EventSource`](crate::remotable::EventSource)
//! on one peer to an observer callback on the other:
//!
//! - [`CallbackObserver`]: the inline remotable wrapped around the caller's
//!   closure; the peer invokes its `next` method for each emission.
//! - [`RemoteSubscription`]: the remotable living next to the event source;
//!   exposes `unsubscribe` to the remote peer and detaches on drop, so a
//!   finalized subscription reference also tears the observer down.
//! - [`RemoteSubscriptionHandle`]: the caller-side wrapper over the proxy
//!   returned by `subscribeToEvent`.

use std::sync::Arc;

use tracing::debug;
use webrpc_common::{BoxFuture, Result, ServiceError, WireError};

use crate::proxy::RemoteObject;
use crate::remotable::{CallResult, EventSubscription, Exposure, Remotable};
use crate::value::RpcValue;

/// Inline remotable exposing a single `next` method backed by a closure.
pub(crate) struct CallbackObserver {
    callback: Box<dyn Fn(RpcValue) + Send + Sync>,
}

impl CallbackObserver {
    pub fn new<F>(callback: F) -> Arc<dyn Remotable>
    where
        F: Fn(RpcValue) + Send + Sync + 'static,
    {
        Arc::new(Self {
            callback: Box::new(callback),
        })
    }
}

impl Remotable for CallbackObserver {
    fn dispatch<'a>(&'a self, method: &'a str, mut params: Vec<RpcValue>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            match method {
                "next" => {
                    let value = if params.is_empty() {
                        RpcValue::null()
                    } else {
                        params.remove(0)
                    };
                    (self.callback)(value);
                    Ok(RpcValue::null())
                }
                other => Err(ServiceError::from(WireError::generic(format!(
                    "No such method '{}'",
                    other
                )))),
            }
        })
    }

    fn exposure(&self, method: &str) -> Option<Exposure> {
        (method == "next").then_some(Exposure::Any)
    }
}

/// The remotable returned to the subscribing peer by `subscribeToEvent`.
///
/// Alive for as long as the peer retains its reference: when the peer
/// either calls `unsubscribe` or lets the reference finalize, the local
/// observer is removed from the event source.
pub struct RemoteSubscription {
    subscription: EventSubscription,
    event_name: String,
}

impl RemoteSubscription {
    pub(crate) fn new(subscription: EventSubscription, event_name: String) -> Arc<dyn Remotable> {
        Arc::new(Self {
            subscription,
            event_name,
        })
    }
}

impl Remotable for RemoteSubscription {
    fn dispatch<'a>(&'a self, method: &'a str, _params: Vec<RpcValue>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            match method {
                "unsubscribe" => {
                    self.subscription.unsubscribe();
                    Ok(RpcValue::null())
                }
                other => Err(ServiceError::from(WireError::generic(format!(
                    "No such method '{}'",
                    other
                )))),
            }
        })
    }

    fn exposure(&self, method: &str) -> Option<Exposure> {
        (method == "unsubscribe").then_some(Exposure::Any)
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        debug!(event = %self.event_name, "remote subscription released");
        self.subscription.unsubscribe();
    }
}

/// Caller-side handle over a remote subscription.
pub struct RemoteSubscriptionHandle {
    proxy: RemoteObject,
}

impl RemoteSubscriptionHandle {
    pub(crate) fn new(proxy: RemoteObject) -> Self {
        Self { proxy }
    }

    /// Cancels the remote subscription.
    pub async fn unsubscribe(&self) -> Result<()> {
        self.proxy.call("unsubscribe", vec![]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remotable::EventSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_callback_observer_routes_next() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let observer = CallbackObserver::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        observer
            .dispatch("next", vec![RpcValue::from("x")])
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(observer.dispatch("other", vec![]).await.is_err());
        assert_eq!(observer.exposure("next"), Some(Exposure::Any));
        assert_eq!(observer.exposure("unsubscribe"), None);
    }

    #[tokio::test]
    async fn test_remote_subscription_unsubscribes_on_call() {
        let source = EventSource::new("E");
        let subscription = source.subscribe(Arc::new(|_| {}));
        let remote = RemoteSubscription::new(subscription, "E".into());

        assert_eq!(source.observer_count(), 1);
        remote.dispatch("unsubscribe", vec![]).await.unwrap();
        assert_eq!(source.observer_count(), 0);
    }

    #[test]
    fn test_remote_subscription_detaches_on_drop() {
        let source = EventSource::new("E");
        let subscription = source.subscribe(Arc::new(|_| {}));
        let remote = RemoteSubscription::new(subscription, "E".into());

        assert_eq!(source.observer_count(), 1);
        drop(remote);
        assert_eq!(source.observer_count(), 0);
    }
}
