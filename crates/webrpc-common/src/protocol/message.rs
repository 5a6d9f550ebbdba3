//! WebRPC Message Envelope
//!
//! This module defines the wire envelope exchanged between peers. Every
//! frame is a UTF-8 JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::protocol::error::{Result, WebrpcError};

/// The wire envelope, discriminated by `type`.
///
/// `Event` is reserved: the current protocol routes all event delivery via
/// subscription callbacks, so receivers decode and ignore it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A method invocation on a receiver resolved from a reference descriptor
    Request(RequestMessage),
    /// The correlated reply to a request
    Response(ResponseMessage),
    /// Low-level liveness probe
    Ping,
    /// Reply to a liveness probe
    Pong,
    /// Reserved envelope; ignored on receipt
    Event(EventMessage),
}

/// An RPC request to be sent to the peer.
///
/// # Fields
///
/// - `id`: request UUID used to correlate the response
/// - `receiver`: a reference descriptor naming the target object
/// - `method`: name of the method to invoke on the receiver
/// - `parameters`: encoded arguments; descriptors may appear anywhere
/// - `metadata`: open-ended call metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestMessage {
    /// Unique request identifier
    pub id: Uuid,
    /// Reference descriptor for the target object
    pub receiver: Value,
    /// Method name to invoke
    pub method: String,
    /// Encoded method parameters
    #[serde(default)]
    pub parameters: Vec<Value>,
    /// Open-ended call metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RequestMessage {
    /// Creates a new request with a freshly allocated UUID.
    pub fn new(receiver: Value, method: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            receiver,
            method: method.into(),
            parameters,
            metadata: Map::new(),
        }
    }

    /// Attaches call metadata.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The correlated reply to a request. Exactly one of `value` and `error`
/// is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    /// The id of the request this responds to
    pub id: Uuid,
    /// Result value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Serialized error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseMessage {
    /// Creates a success response.
    pub fn success(id: Uuid, value: Value) -> Self {
        Self {
            id,
            value: Some(value),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(id: Uuid, error: Value) -> Self {
        Self {
            id,
            value: None,
            error: Some(error),
        }
    }
}

/// Reserved event envelope. Defined by the wire format but currently unused
/// end-to-end; receivers must tolerate and ignore it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    /// Reference descriptor for the event source
    pub receiver: Value,
    /// Event name
    pub name: String,
    /// Event payload
    #[serde(default)]
    pub object: Value,
}

impl Message {
    /// Encodes this message to a wire frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a wire frame into a message.
    ///
    /// Decoding failures on an incoming frame are fatal to the session, so
    /// the error carries the offending payload for the log.
    pub fn from_frame(frame: &str) -> Result<Message> {
        serde_json::from_str(frame)
            .map_err(|e| WebrpcError::Decode(format!("{} (frame: {})", e, frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let request = RequestMessage::new(json!({"Rε": "org.webrpc.session", "S": "L"}), "add", vec![json!(2), json!(3)]);
        let frame = Message::Request(request.clone()).to_frame().unwrap();
        let decoded = Message::from_frame(&frame).unwrap();
        assert_eq!(decoded, Message::Request(request));
    }

    #[test]
    fn test_request_frame_shape() {
        let request = RequestMessage::new(json!(null), "doStuff", vec![]);
        let frame = Message::Request(request).to_frame().unwrap();
        assert!(frame.contains("\"type\":\"request\""));
        assert!(frame.contains("\"method\":\"doStuff\""));
    }

    #[test]
    fn test_response_success() {
        let id = Uuid::new_v4();
        let response = ResponseMessage::success(id, json!(5));
        assert_eq!(response.value, Some(json!(5)));
        assert_eq!(response.error, None);
    }

    #[test]
    fn test_response_error_omits_value() {
        let response = ResponseMessage::error(Uuid::new_v4(), json!({"message": "boom"}));
        let frame = Message::Response(response).to_frame().unwrap();
        assert!(!frame.contains("\"value\""));
        assert!(frame.contains("\"error\""));
    }

    #[test]
    fn test_ping_pong_frames() {
        assert_eq!(Message::Ping.to_frame().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(Message::from_frame(r#"{"type":"pong"}"#).unwrap(), Message::Pong);
    }

    #[test]
    fn test_event_envelope_decodes() {
        let frame = r#"{"type":"event","receiver":null,"name":"E","object":{"x":1}}"#;
        let decoded = Message::from_frame(frame).unwrap();
        assert!(matches!(decoded, Message::Event(_)));
    }

    #[test]
    fn test_invalid_frame_is_decode_error() {
        let err = Message::from_frame("not json").unwrap_err();
        assert!(matches!(err, WebrpcError::Decode(_)));
    }

    #[test]
    fn test_missing_parameters_default_to_empty() {
        let frame = format!(
            r#"{{"type":"request","id":"{}","receiver":null,"method":"m"}}"#,
            Uuid::new_v4()
        );
        let decoded = Message::from_frame(&frame).unwrap();
        match decoded {
            Message::Request(req) => assert!(req.parameters.is_empty()),
            other => panic!("expected request, got {:?}", other),
        }
    }
}
