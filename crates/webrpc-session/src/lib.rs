//! WebRPC Session Layer
//!
//! The protocol state machine for one channel: reference bookkeeping,
//! distributed reference counting with finalization, proxy materialization
//! and identity collapse, call/response correlation, event subscription
//! fan-out, error translation, and discovery/introspection answered as
//! ordinary RPCs.
//!
//! # Overview
//!
//! - [`Session`] owns all registries; one per channel, living as long as
//!   the channel does
//! - [`RemoteObject`] is the proxy handle standing in for a remote
//!   remotable
//! - [`Remotable`] is the dispatch trait local objects implement to be
//!   invocable from the peer
//! - [`EventSource`] is the per-event pub/sub primitive services publish
//!   observable events through
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webrpc_common::MemoryChannel;
//! use webrpc_session::{Session, RpcValue};
//!
//! # async fn example() -> webrpc_common::Result<()> {
//! let (near, far) = MemoryChannel::pair();
//! let session = Session::new(near);
//! let _peer = Session::new(far);
//!
//! let service = session.get_remote_service("calc").await?.unwrap();
//! let sum = service
//!     .call("add", vec![RpcValue::from(2.0), RpcValue::from(3.0)])
//!     .await?;
//! assert_eq!(sum.as_f64(), Some(5.0));
//! # Ok(())
//! # }
//! ```

mod encode;
pub mod introspect;
pub mod proxy;
mod registry;
pub mod remotable;
pub mod session;
pub mod subscription;
pub mod value;

pub use introspect::{DiscoveredService, IntrospectedService};
pub use proxy::RemoteObject;
pub use remotable::{
    CallResult, EventMetadata, EventSource, EventSubscription, Exposure, MethodMetadata, Observer,
    ParameterMetadata, Remotable, ServiceMetadata, SimpleType,
};
pub use session::{Session, SessionOptions, WeakSession};
pub use subscription::RemoteSubscriptionHandle;
pub use value::RpcValue;
