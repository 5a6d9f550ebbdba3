//! Reference Descriptors
//!
//! A reference descriptor is the wire record that lets a remotable value
//! cross the channel by identity instead of by copy. It may appear anywhere
//! a JSON value is expected.
//!
//! # Wire Form
//!
//! ```text
//! { "Rε": "<uuid-or-well-known>", "S": "L"|"R", "Rid": "<uuid>" }
//! ```
//!
//! - `Rε` is the object identifier (a UUID, or a well-known string for the
//!   session object).
//! - `S` is the side marker, relative to the *sender*: `"L"` means local to
//!   the sender, `"R"` means remote to the sender.
//! - `Rid` is the per-reference UUID, present only when `S = "L"`; absent
//!   for proxies being passed back and for well-known ids.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The reserved well-known id under which each session registers itself.
pub const SESSION_WELL_KNOWN_ID: &str = "org.webrpc.session";

/// Object identifier field name on the wire.
const KEY_OBJECT_ID: &str = "R\u{3b5}";
/// Side marker field name on the wire.
const KEY_SIDE: &str = "S";
/// Reference id field name on the wire.
const KEY_REFERENCE_ID: &str = "Rid";

/// Which peer the referenced object lives on, relative to the sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    /// Local to the sender, remote to the receiver
    #[serde(rename = "L")]
    Local,
    /// Remote to the sender, local to the receiver
    #[serde(rename = "R")]
    Remote,
}

/// A parsed reference descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefDescriptor {
    /// Object identifier (UUID or well-known string)
    #[serde(rename = "R\u{3b5}")]
    pub object_id: String,
    /// Side marker relative to the sender
    #[serde(rename = "S")]
    pub side: Side,
    /// Per-reference UUID; present only for freshly allocated local references
    #[serde(rename = "Rid", default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

/// Result of inspecting a JSON value for descriptor shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRef {
    /// A well-formed descriptor
    Ref(RefDescriptor),
    /// Descriptor-shaped but missing `Rε`; decodes to null
    Undefined,
}

impl RefDescriptor {
    /// A freshly allocated local reference (`S = "L"` with a reference id).
    pub fn local(object_id: impl Into<String>, reference_id: Uuid) -> Self {
        Self {
            object_id: object_id.into(),
            side: Side::Local,
            reference_id: Some(reference_id.to_string()),
        }
    }

    /// A pass-back reference to an object remote to the sender (`S = "R"`).
    pub fn remote(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            side: Side::Remote,
            reference_id: None,
        }
    }

    /// A well-known reference, outside the GC machinery (`S = "L"`, no `Rid`).
    pub fn well_known(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            side: Side::Local,
            reference_id: None,
        }
    }

    /// The outstanding-reference registry key, `"<object_id>.<reference_id>"`.
    ///
    /// Only references that carry a reference id occupy a registry entry;
    /// well-known and pass-back references have no lifetime to manage.
    pub fn key(&self) -> Option<String> {
        self.reference_id
            .as_ref()
            .map(|rid| ref_key(&self.object_id, rid))
    }

    /// Encodes this descriptor as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("descriptor serialization is infallible")
    }

    /// Inspects a JSON value for descriptor shape.
    ///
    /// Returns `None` for values that are not descriptors at all. A value
    /// carrying a valid side marker but no `Rε` parses as
    /// [`ParsedRef::Undefined`].
    pub fn from_value(value: &Value) -> Option<ParsedRef> {
        let map = value.as_object()?;
        let side = match map.get(KEY_SIDE)?.as_str()? {
            "L" => Side::Local,
            "R" => Side::Remote,
            _ => return None,
        };
        // Anything beyond the three descriptor fields is ordinary data.
        if map
            .keys()
            .any(|k| k != KEY_OBJECT_ID && k != KEY_SIDE && k != KEY_REFERENCE_ID)
        {
            return None;
        }
        let object_id = match map.get(KEY_OBJECT_ID) {
            Some(Value::String(id)) => id.clone(),
            _ => return Some(ParsedRef::Undefined),
        };
        let reference_id = map
            .get(KEY_REFERENCE_ID)
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        Some(ParsedRef::Ref(RefDescriptor {
            object_id,
            side,
            reference_id,
        }))
    }
}

/// Formats the outstanding-reference registry key for a reference.
pub fn ref_key(object_id: &str, reference_id: &str) -> String {
    format!("{}.{}", object_id, reference_id)
}
