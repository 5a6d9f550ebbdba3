//! Endpoint Cache
//!
//! Per-URL reuse of durable channels and their sessions. Connecting two
//! façades to the same endpoint URL shares one reconnecting socket and one
//! session; entries are weak, so an endpoint with no remaining users is
//! torn down rather than kept dialing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use webrpc_durable::{DurableSocket, SocketChannel, TcpConnector};
use webrpc_session::{Session, WeakSession};

use crate::facade::ServiceClient;

struct EndpointEntry {
    channel: Weak<SocketChannel>,
    session: WeakSession,
}

static ENDPOINTS: OnceLock<Mutex<HashMap<String, EndpointEntry>>> = OnceLock::new();

/// Connects a façade to a service at the given endpoint URL.
///
/// The durable channel and session for the URL are cached and shared
/// between façades. Must be called within a tokio runtime.
pub fn connect(service_name: impl Into<String>, url: &str) -> ServiceClient {
    let (channel, session) = channel_for(url);
    ServiceClient::with_session(service_name, channel, session)
}

fn channel_for(url: &str) -> (Arc<SocketChannel>, Session) {
    let mut endpoints = ENDPOINTS
        .get_or_init(Default::default)
        .lock()
        .expect("endpoint cache lock poisoned");
    if let Some(entry) = endpoints.get(url) {
        if let (Some(channel), Some(session)) = (entry.channel.upgrade(), entry.session.upgrade())
        {
            return (channel, session);
        }
    }
    let socket = DurableSocket::new(Arc::new(TcpConnector), url);
    let channel = SocketChannel::new(socket);
    let session = Session::new(channel.clone());
    endpoints.insert(
        url.to_string(),
        EndpointEntry {
            channel: Arc::downgrade(&channel),
            session: session.downgrade(),
        },
    );
    (channel, session)
}
