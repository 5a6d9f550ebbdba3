//! WebRPC: Bidirectional Capability-Style RPC
//!
//! Two peers exchange JSON messages over any bidirectional transport.
//! Either side may expose remotable objects, invoke methods on the other
//! side's objects, subscribe to observable event streams on them, and pass
//! object references as arguments and return values. The runtime keeps
//! every live reference on one peer alive on the other, collapses
//! duplicate proxies to preserve object identity, and recovers from
//! transport state loss without leaking references or orphaning event
//! subscriptions.
//!
//! # Crates
//!
//! - [`webrpc_common`]: wire protocol, reference descriptors, error
//!   taxonomy, channel abstraction
//! - [`webrpc_session`]: the session state machine
//! - [`webrpc_durable`]: the reconnecting durable socket
//! - [`webrpc_client`]: the immediate-use service-proxy façade
//!
//! This crate re-exports the public surface of all four.

pub use webrpc_client::{connect, FacadeSubscription, ServiceClient};
pub use webrpc_common::{
    raise, Channel, ChannelExt, ErrorRegistry, MemoryChannel, Message, RefDescriptor, RemoteError,
    RequestMessage, ResponseMessage, Result, ServiceError, Side, WebrpcError, WireError,
    SESSION_WELL_KNOWN_ID,
};
pub use webrpc_durable::{
    DurableSocket, DurableSocketEvent, DurableSocketOptions, MemoryConnector, SocketChannel,
    SocketConnector, TcpConnector,
};
pub use webrpc_session::{
    CallResult, DiscoveredService, EventSource, Exposure, IntrospectedService, MethodMetadata,
    ParameterMetadata, Remotable, RemoteObject, RpcValue, ServiceMetadata, Session,
    SessionOptions, SimpleType,
};
