//! WebRPC Protocol Definitions
//!
//! This module defines the core protocol types for WebRPC: the message
//! envelope, reference descriptors, and the structured error taxonomy.
//!
//! # Protocol Types
//!
//! - **[`Message`]**: the wire envelope, discriminated by `type`
//! - **[`RefDescriptor`]**: wire record identifying a remotable by object id
//!   and allocation reference id, with a side marker relative to the sender
//! - **[`WireError`]** / **[`ErrorRegistry`]**: serialization and
//!   deserialization of structured errors
//! - **[`WebrpcError`]**: the library error type surfaced to callers
//!
//! # Side Markers
//!
//! Reference-side markers are interpreted relative to the *sender*:
//! `"L"` means local-to-sender (remote to the receiver), `"R"` means
//! remote-to-sender (local to the receiver).

pub mod error;
pub mod message;
pub mod reference;
pub mod wire_error;


pub use error::{Result, WebrpcError};
pub use message::{EventMessage, Message, RequestMessage, ResponseMessage};
pub use reference::{ParsedRef, RefDescriptor, Side, SESSION_WELL_KNOWN_ID};
pub use wire_error::{
    raise, ErrorRegistry, RemoteError, ServiceError, WireError, CALLER_TRACE_DELIMITER,
    INTERNAL_ERROR,
};
