use thiserror::Error;

use crate::protocol::wire_error::RemoteError;

/// Error codes used in `invalid-call` responses.
pub mod invalid_call {
    /// The request carried no receiver descriptor.
    pub const NO_RECEIVER_SPECIFIED: &str = "no-receiver-specified";
    /// The receiver descriptor did not resolve to a local object.
    pub const NO_SUCH_RECEIVER: &str = "no-such-receiver";
    /// The receiver has no exposed method of that name.
    pub const NO_SUCH_METHOD: &str = "no-such-method";
}

#[derive(Error, Debug)]
pub enum WebrpcError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel state was lost: {0}")]
    StateLost(String),

    #[error("Invalid call ({code}): {message}")]
    InvalidCall { code: String, message: String },

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Remote error: {0}")]
    Remote(RemoteError),

    #[error("Connection failed with code {code}: {message}")]
    ConnectFailed { code: u16, message: String },

    #[error("Duplicate service name: {0}")]
    DuplicateService(String),

    #[error("No such service: {0}")]
    NoSuchService(String),

    #[error("Resubscription failed after channel recovery: {0}")]
    Resubscribe(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WebrpcError {
    /// Shorthand for an `invalid-call` error with the given code and message.
    pub fn invalid_call(code: &str, message: impl Into<String>) -> Self {
        WebrpcError::InvalidCall {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// The state-loss error applied to every in-flight request when the
    /// channel reports a lost state.
    pub fn state_lost(reason: impl Into<String>) -> Self {
        WebrpcError::StateLost(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, WebrpcError>;
