//! WebRPC Durable Transport
//!
//! A reconnecting endpoint over any short-lived socket factory, plus the
//! adapter that surfaces it as a session-facing channel.
//!
//! # Contracts
//!
//! - **Reconnect policy**: exponential backoff with jitter; after the
//!   configured attempt budget the endpoint declares fatal failure with
//!   code 503.
//! - **Send queue**: frames enqueued during an outage drain in FIFO order
//!   before any subsequent send.
//! - **Session continuity**: a server-assigned session id is stored and
//!   appended as a query parameter on every later connect URL.
//! - **Keep-alive**: application-level ping/pong, consumed internally.

pub mod channel;
pub mod durable;
pub mod socket;

pub use channel::SocketChannel;
pub use durable::{
    DurableSocket, DurableSocketEvent, DurableSocketOptions, CLOSE_CODE_NORMAL,
    CLOSE_CODE_UNAVAILABLE,
};
pub use socket::{MemoryConnector, ServerSocket, SocketConnector, SocketEvent, SocketHandle, TcpConnector};
