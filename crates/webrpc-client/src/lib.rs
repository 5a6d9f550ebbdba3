//! WebRPC Service-Proxy Façade
//!
//! "It just works" semantics over a durable transport: a façade handle is
//! available immediately, defers calls until the channel, session and
//! service handle resolve, and recovers event subscriptions across state
//! loss.
//!
//! # Example
//!
//! ```no_run
//! use webrpc_client::connect;
//! use webrpc_session::RpcValue;
//!
//! # async fn example() -> webrpc_common::Result<()> {
//! let calc = connect("calc", "tcp://127.0.0.1:9000");
//! let sum = calc
//!     .call("add", vec![RpcValue::from(2.0), RpcValue::from(3.0)])
//!     .await?;
//! assert_eq!(sum.as_f64(), Some(5.0));
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod facade;

pub use endpoint::connect;
pub use facade::{FacadeSubscription, ServiceClient};
