//! WebRPC Transport Layer
//!
//! This module provides the abstract [`Channel`] capability the session
//! consumes, plus the in-memory paired channel used for tests.
//!
//! # The Channel Contract
//!
//! A channel is a duplex text-frame transport characterised by three
//! capabilities and one operation:
//!
//! - **frames**: the stream of inbound text frames
//! - **ready** (optional): whether the channel can currently send and
//!   receive; late subscribers observe the current state, never a missed
//!   edge
//! - **state_lost** (optional): one emission per ready-to-not-ready
//!   transition, carrying a human-readable reason
//! - **send(frame)**: may suspend until ready; never silently drops
//!
//! The session consumes this abstraction only: it never assumes framing
//! size limits, ordering across reconnects, or delivery receipts.

pub mod channel;
pub mod memory;

pub use channel::{Channel, ChannelExt};
pub use memory::MemoryChannel;
