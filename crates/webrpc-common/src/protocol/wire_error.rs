//! Wire Error Taxonomy
//!
//! Structured errors cross the channel as plain JSON objects. This module
//! defines the serialization form, the registry of known error kinds, and
//! the policy helpers for masking and intentional errors.
//!
//! # Serialization Form
//!
//! ```text
//! { "name": ..., "message": ..., "stack": ..., "$constructorName": ..., ...own fields }
//! ```
//!
//! Aggregate errors additionally carry `errors: []` of recursively
//! serialized children.
//!
//! # Policy
//!
//! - **mask-stack-traces** (default on): outbound stacks are stripped down
//!   to `"<Name>: <message>"`.
//! - **safe-exceptions** (default on): values not marked intentional via
//!   [`raise`] reach the peer as the [`INTERNAL_ERROR`] placeholder while
//!   the true error is logged on the throwing side.
//! - **addCallerStackTraces** (default on): the calling side appends its own
//!   call-site trace to the deserialized remote error under a delimiter line.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Standard language-independent error kinds preloaded into every registry.
pub const STANDARD_ERROR_KINDS: &[&str] = &[
    "GenericError",
    "EvalError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
    "AggregateError",
];

/// The reserved placeholder kind substituted for unmarked throws in
/// safe-exceptions mode.
pub const INTERNAL_ERROR: &str = "InternalError";

/// Message carried by the internal-error placeholder. Deliberately generic.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

/// Delimiter line inserted between a remote stack and the appended
/// caller-side trace.
pub const CALLER_TRACE_DELIMITER: &str = "    --- called from ---";

const CONSTRUCTOR_NAME_KEY: &str = "$constructorName";
const RESERVED_KEYS: &[&str] = &["name", "message", "stack", CONSTRUCTOR_NAME_KEY, "errors"];

/// A structured error in its wire-ready form.
#[derive(Debug, Clone, PartialEq)]
pub struct WireError {
    /// Error name, usually equal to the constructor name
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// Stack trace, if captured
    pub stack: Option<String>,
    /// The registered kind this error deserializes back into
    pub constructor_name: String,
    /// Own enumerable fields beyond the reserved ones
    pub fields: Map<String, Value>,
    /// Children of an aggregate error
    pub errors: Vec<WireError>,
}

impl WireError {
    /// Creates an error of the given kind with `name == constructor_name`.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            name: kind.clone(),
            message: message.into(),
            stack: None,
            constructor_name: kind,
            fields: Map::new(),
            errors: Vec::new(),
        }
    }

    /// A `GenericError`.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new("GenericError", message)
    }

    /// A `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// A `RangeError`.
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    /// The internal-error placeholder sent for unmarked throws in
    /// safe-exceptions mode.
    pub fn internal_placeholder() -> Self {
        Self::new(INTERNAL_ERROR, INTERNAL_ERROR_MESSAGE)
    }

    /// An `AggregateError` wrapping the given children.
    pub fn aggregate(message: impl Into<String>, errors: Vec<WireError>) -> Self {
        let mut err = Self::new("AggregateError", message);
        err.errors = errors;
        err
    }

    /// Attaches a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attaches an own enumerable field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The masked stack form, `"<Name>: <message>"`.
    pub fn masked_stack(&self) -> String {
        format!("{}: {}", self.name, self.message)
    }

    /// Serializes to the wire form. With `mask_stack` the stack is reduced
    /// to [`WireError::masked_stack`].
    pub fn to_value(&self, mask_stack: bool) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("message".into(), Value::String(self.message.clone()));
        let stack = if mask_stack {
            self.masked_stack()
        } else {
            self.stack.clone().unwrap_or_else(|| self.masked_stack())
        };
        map.insert("stack".into(), Value::String(stack));
        map.insert(
            CONSTRUCTOR_NAME_KEY.into(),
            Value::String(self.constructor_name.clone()),
        );
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        if !self.errors.is_empty() || self.constructor_name == "AggregateError" {
            map.insert(
                "errors".into(),
                Value::Array(self.errors.iter().map(|e| e.to_value(mask_stack)).collect()),
            );
        }
        Value::Object(map)
    }

    /// Parses the wire form back into a structured error.
    ///
    /// Non-object values are not errors in this taxonomy and return `None`;
    /// callers fall back to a generic carrier.
    pub fn from_value(value: &Value) -> Option<WireError> {
        let map = value.as_object()?;
        let name = map
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("Error")
            .to_string();
        let message = map
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let stack = map.get("stack").and_then(|v| v.as_str()).map(str::to_owned);
        let constructor_name = map
            .get(CONSTRUCTOR_NAME_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(&name)
            .to_string();
        let errors = map
            .get("errors")
            .and_then(|v| v.as_array())
            .map(|children| children.iter().filter_map(WireError::from_value).collect())
            .unwrap_or_default();
        let mut fields = Map::new();
        for (key, field) in map {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                fields.insert(key.clone(), field.clone());
            }
        }
        Some(WireError {
            name,
            message,
            stack,
            constructor_name,
            fields,
            errors,
        })
    }
}

/// An error raised by a service method, carrying the intentional marker.
///
/// Unmarked errors are treated as internal in safe-exceptions mode and
/// replaced with the placeholder on the wire.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// The structured error payload
    pub error: WireError,
    /// Whether the thrower marked this error as intended for the peer
    pub intentional: bool,
}

impl From<WireError> for ServiceError {
    fn from(error: WireError) -> Self {
        Self {
            error,
            intentional: false,
        }
    }
}

/// Marks `error` with the intentional-error sentinel so it crosses the wire
/// unmasked even in safe-exceptions mode.
pub fn raise(error: WireError) -> ServiceError {
    ServiceError {
        error,
        intentional: true,
    }
}

/// A remote error after deserialization on the calling side.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// The resolved registered kind, or `"GenericError"` for unknown kinds
    pub kind: String,
    /// Error name as sent by the peer
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// Stack trace as received, possibly masked by the peer
    pub stack: Option<String>,
    /// Own enumerable fields copied from the wire form
    pub fields: Map<String, Value>,
    /// Children of an aggregate error
    pub errors: Vec<RemoteError>,
}

impl RemoteError {
    /// Whether this error deserialized as the given registered kind.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Appends a caller-side trace beneath the remote stack, separated by
    /// [`CALLER_TRACE_DELIMITER`].
    pub fn append_caller_trace(&mut self, trace: &str) {
        let base = self
            .stack
            .take()
            .unwrap_or_else(|| format!("{}: {}", self.name, self.message));
        self.stack = Some(format!("{}\n{}\n{}", base, CALLER_TRACE_DELIMITER, trace));
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Factory turning a parsed wire error into a typed remote error.
pub type ErrorFactory = Arc<dyn Fn(&WireError) -> RemoteError + Send + Sync>;

/// Table of known error kinds, preloaded with the standard set.
///
/// Deserialization looks up `$constructorName` first, then `name`; unknown
/// kinds wrap into a generic carrier keeping name, message and stack.
#[derive(Clone)]
pub struct ErrorRegistry {
    types: HashMap<String, ErrorFactory>,
}

impl ErrorRegistry {
    /// Creates a registry preloaded with the standard kinds and the
    /// internal-error placeholder.
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
        };
        for kind in STANDARD_ERROR_KINDS {
            registry.register(kind);
        }
        registry.register(INTERNAL_ERROR);
        registry
    }

    /// Registers a kind with the default copy-fields factory.
    pub fn register(&mut self, kind: &str) {
        let owned = kind.to_string();
        self.types.insert(
            owned.clone(),
            Arc::new(move |wire| default_remote_error(&owned, wire)),
        );
    }

    /// Registers a kind with an explicit factory callback.
    ///
    /// The explicit callback is the only factory source in this API, so the
    /// ambiguity between a static deserializer and a free callback cannot
    /// arise; the callback always wins.
    pub fn register_with<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&WireError) -> RemoteError + Send + Sync + 'static,
    {
        self.types.insert(kind.to_string(), Arc::new(factory));
    }

    /// Whether a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    /// Deserializes a wire value into a remote error.
    pub fn deserialize(&self, value: &Value) -> RemoteError {
        let Some(wire) = WireError::from_value(value) else {
            // Not an error-shaped value at all; keep what we can for the log.
            return RemoteError {
                kind: "GenericError".into(),
                name: "Error".into(),
                message: value.to_string(),
                stack: None,
                fields: Map::new(),
                errors: Vec::new(),
            };
        };
        self.deserialize_wire(&wire)
    }

    fn deserialize_wire(&self, wire: &WireError) -> RemoteError {
        let factory = self
            .types
            .get(&wire.constructor_name)
            .or_else(|| self.types.get(&wire.name));
        let mut remote = match factory {
            Some(factory) => factory(wire),
            None => default_remote_error("GenericError", wire),
        };
        // Aggregate children always recurse through the registry so nested
        // kinds resolve the same way as top-level ones.
        remote.errors = wire
            .errors
            .iter()
            .map(|child| self.deserialize_wire(child))
            .collect();
        remote
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default factory: copy all fields onto a carrier of the given kind.
fn default_remote_error(kind: &str, wire: &WireError) -> RemoteError {
    RemoteError {
        kind: kind.to_string(),
        name: wire.name.clone(),
        message: wire.message.clone(),
        stack: wire.stack.clone(),
        fields: wire.fields.clone(),
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_masked_stack_form() {
        let err = WireError::type_error("x").with_stack("TypeError: x\n    at main.rs:10");
        let value = err.to_value(true);
        assert_eq!(value["stack"], json!("TypeError: x"));
    }

    #[test]
    fn test_unmasked_stack_preserved() {
        let err = WireError::type_error("x").with_stack("TypeError: x\n    at main.rs:10");
        let value = err.to_value(false);
        assert_eq!(value["stack"], json!("TypeError: x\n    at main.rs:10"));
    }

    #[test]
    fn test_constructor_name_on_wire() {
        let value = WireError::range_error("out of range").to_value(true);
        assert_eq!(value["$constructorName"], json!("RangeError"));
        assert_eq!(value["name"], json!("RangeError"));
    }

    #[test]
    fn test_own_fields_round_trip() {
        let err = WireError::generic("boom").with_field("code", json!(42));
        let value = err.to_value(true);
        assert_eq!(value["code"], json!(42));
        let parsed = WireError::from_value(&value).unwrap();
        assert_eq!(parsed.fields.get("code"), Some(&json!(42)));
    }

    #[test]
    fn test_aggregate_serializes_children() {
        let err = WireError::aggregate(
            "several things failed",
            vec![WireError::type_error("a"), WireError::range_error("b")],
        );
        let value = err.to_value(true);
        let children = value["errors"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0]["$constructorName"], json!("TypeError"));
    }

    #[test]
    fn test_registry_resolves_standard_kinds() {
        let registry = ErrorRegistry::new();
        let value = WireError::type_error("x").to_value(true);
        let remote = registry.deserialize(&value);
        assert!(remote.is_kind("TypeError"));
        assert_eq!(remote.name, "TypeError");
        assert_eq!(remote.message, "x");
    }

    #[test]
    fn test_registry_unknown_kind_falls_back_to_generic() {
        let registry = ErrorRegistry::new();
        let value = WireError::new("FrobnicationError", "gears jammed").to_value(true);
        let remote = registry.deserialize(&value);
        assert!(remote.is_kind("GenericError"));
        assert_eq!(remote.name, "FrobnicationError");
        assert_eq!(remote.message, "gears jammed");
    }

    #[test]
    fn test_registry_custom_factory_wins() {
        let mut registry = ErrorRegistry::new();
        registry.register_with("FrobnicationError", |wire| RemoteError {
            kind: "FrobnicationError".into(),
            name: wire.name.clone(),
            message: format!("custom: {}", wire.message),
            stack: None,
            fields: Map::new(),
            errors: Vec::new(),
        });
        let value = WireError::new("FrobnicationError", "gears jammed").to_value(true);
        let remote = registry.deserialize(&value);
        assert_eq!(remote.message, "custom: gears jammed");
    }

    #[test]
    fn test_registry_resolves_by_name_when_constructor_missing() {
        let registry = ErrorRegistry::new();
        let value = json!({"name": "TypeError", "message": "no ctor"});
        let remote = registry.deserialize(&value);
        assert!(remote.is_kind("TypeError"));
    }

    #[test]
    fn test_aggregate_children_resolve_through_registry() {
        let registry = ErrorRegistry::new();
        let err = WireError::aggregate("outer", vec![WireError::type_error("inner")]);
        let remote = registry.deserialize(&err.to_value(true));
        assert!(remote.is_kind("AggregateError"));
        assert_eq!(remote.errors.len(), 1);
        assert!(remote.errors[0].is_kind("TypeError"));
    }

    #[test]
    fn test_raise_marks_intentional() {
        let err = raise(WireError::generic("meant for the peer"));
        assert!(err.intentional);
        let unmarked: ServiceError = WireError::generic("oops").into();
        assert!(!unmarked.intentional);
    }

    #[test]
    fn test_non_error_value_becomes_generic_carrier() {
        let registry = ErrorRegistry::new();
        let remote = registry.deserialize(&json!("just a string"));
        assert!(remote.is_kind("GenericError"));
        assert!(remote.message.contains("just a string"));
    }

    #[test]
    fn test_caller_trace_appended_under_delimiter() {
        let registry = ErrorRegistry::new();
        let value = WireError::type_error("x").to_value(true);
        let mut remote = registry.deserialize(&value);
        remote.append_caller_trace("    at caller_fn (client.rs:12)");
        let stack = remote.stack.unwrap();
        let delimiter_pos = stack.find(CALLER_TRACE_DELIMITER).unwrap();
        assert!(stack[delimiter_pos..].contains("caller_fn"));
        assert!(stack[..delimiter_pos].contains("TypeError: x"));
    }
}
