//! WebRPC Common Types and Channel Abstraction
//!
//! This crate provides the core protocol definitions and the channel
//! abstraction for the WebRPC bidirectional RPC system.
//!
//! # Overview
//!
//! WebRPC is a capability-style RPC runtime where two peers exchange JSON
//! messages over any bidirectional transport. Either side may expose
//! remotable objects, invoke methods on the other side's objects, subscribe
//! to event streams, and pass object references as arguments and return
//! values. This crate contains the shared infrastructure used by all
//! components:
//!
//! - **Protocol Layer**: message envelope, reference descriptors, and the
//!   error taxonomy carried over the wire
//! - **Transport Layer**: the abstract [`Channel`] capability and the
//!   in-memory paired channel used by tests
//!
//! # Wire Format
//!
//! UTF-8 JSON text frames, discriminated by `type`:
//!
//! ```text
//! request : { "type":"request",  "id":UUIDv4, "receiver":Ref, "method":..., "parameters":[...], "metadata":{...} }
//! response: { "type":"response", "id":UUIDv4, "value":..., "error":... }
//! ping    : { "type":"ping" }
//! pong    : { "type":"pong" }
//! ```
//!
//! Reference descriptors may appear anywhere a JSON value is expected:
//!
//! ```text
//! { "Rε": "<uuid-or-well-known>", "S": "L"|"R", "Rid": "<uuid>" }
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{Channel, ChannelExt, MemoryChannel};

/// Boxed future alias used across the object-safe traits in this workspace.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
