//! Pre-Encode Value Tree
//!
//! Arguments and return values travel through the session as [`RpcValue`]
//! trees. Plain JSON passes through untouched; remotable objects and
//! proxies are carried by handle so the reference encoder can substitute
//! descriptors for them without losing identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::proxy::RemoteObject;
use crate::remotable::Remotable;

/// A value before reference encoding (outbound) or after reference
/// decoding (inbound).
#[derive(Clone)]
pub enum RpcValue {
    /// Plain JSON with no nested remotables
    Json(Value),
    /// A local remotable, passed by reference
    Object(Arc<dyn Remotable>),
    /// A proxy for a remote object, passed back by reference
    Proxy(RemoteObject),
    /// An array that may contain remotables
    Array(Vec<RpcValue>),
    /// An object that may contain remotables
    Map(BTreeMap<String, RpcValue>),
}

impl RpcValue {
    /// The null value.
    pub fn null() -> Self {
        RpcValue::Json(Value::Null)
    }

    /// Wraps a local remotable.
    pub fn object(object: Arc<dyn Remotable>) -> Self {
        RpcValue::Object(object)
    }

    /// The plain JSON payload, if this is one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RpcValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The proxy handle, if this is one.
    pub fn as_proxy(&self) -> Option<&RemoteObject> {
        match self {
            RpcValue::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// The local remotable, if this is one.
    pub fn as_object(&self) -> Option<&Arc<dyn Remotable>> {
        match self {
            RpcValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// String payload shorthand.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    /// Numeric payload shorthand.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    /// Whether this is JSON null.
    pub fn is_null(&self) -> bool {
        matches!(self, RpcValue::Json(Value::Null))
    }
}

impl From<Value> for RpcValue {
    fn from(value: Value) -> Self {
        RpcValue::Json(value)
    }
}

impl From<&str> for RpcValue {
    fn from(value: &str) -> Self {
        RpcValue::Json(Value::String(value.to_string()))
    }
}

impl From<i64> for RpcValue {
    fn from(value: i64) -> Self {
        RpcValue::Json(Value::from(value))
    }
}

impl From<f64> for RpcValue {
    fn from(value: f64) -> Self {
        RpcValue::Json(Value::from(value))
    }
}

impl From<bool> for RpcValue {
    fn from(value: bool) -> Self {
        RpcValue::Json(Value::Bool(value))
    }
}

impl fmt::Debug for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcValue::Json(value) => write!(f, "Json({})", value),
            RpcValue::Object(_) => write!(f, "Object(<remotable>)"),
            RpcValue::Proxy(proxy) => write!(f, "Proxy({})", proxy.object_id()),
            RpcValue::Array(items) => f.debug_list().entries(items).finish(),
            RpcValue::Map(entries) => f.debug_map().entries(entries).finish(),
        }
    }
}
