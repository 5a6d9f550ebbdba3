//! Reference Encoding
//!
//! The encoder and decoder form the substitution layer applied to every
//! message tree on its way through the session, the per-key replacer and
//! reviver of the wire format.
//!
//! Encoding substitutes remotable values with reference descriptors,
//! registering a strong outstanding-reference entry for every fresh local
//! reference before the frame leaves the session. Decoding materializes
//! proxies for sender-local references, collapses duplicates onto the
//! existing proxy (reporting the redundant fresh reference back for
//! immediate finalization), and resolves sender-remote references in the
//! local object registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use webrpc_common::{ParsedRef, RefDescriptor, Result, Side, WebrpcError};

use crate::proxy::{ProxyInner, RemoteObject};
use crate::registry::{LocalObjects, OutstandingRefs, ProxyRegistry};
use crate::session::Session;
use crate::value::RpcValue;

/// Encodes one value tree, allocating reference descriptors as needed.
///
/// Every descriptor emitted with a fresh reference id is registered in
/// `outstanding` before this returns, so registration always precedes the
/// frame leaving the session.
pub(crate) fn encode_value(
    locals: &mut LocalObjects,
    outstanding: &mut OutstandingRefs,
    value: &RpcValue,
) -> Value {
    match value {
        RpcValue::Json(json) => json.clone(),
        RpcValue::Proxy(proxy) => proxy.descriptor().to_value(),
        RpcValue::Object(object) => {
            let object_id = locals.id_for(object);
            let descriptor = RefDescriptor::local(&object_id, Uuid::new_v4());
            let key = descriptor.key().expect("local descriptors carry a reference id");
            outstanding.insert(key, object.clone());
            descriptor.to_value()
        }
        RpcValue::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| encode_value(locals, outstanding, item))
                .collect(),
        ),
        RpcValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), encode_value(locals, outstanding, item)))
                .collect(),
        ),
    }
}

/// Mutable decode context over the session registries.
///
/// `redundant` accumulates the keys of fresh references that resolved to an
/// already-live proxy; the session finalizes them immediately after the
/// containing message is decoded, otherwise the sender would retain a
/// strong hold forever.
pub(crate) struct DecodeCx<'a> {
    pub session: &'a Session,
    pub locals: &'a mut LocalObjects,
    pub proxies: &'a mut ProxyRegistry,
    pub redundant: Vec<String>,
}

/// Decodes one value tree, materializing proxies and resolving local
/// objects.
pub(crate) fn decode_value(cx: &mut DecodeCx<'_>, value: &Value) -> Result<RpcValue> {
    if let Some(parsed) = RefDescriptor::from_value(value) {
        return match parsed {
            ParsedRef::Undefined => Ok(RpcValue::null()),
            ParsedRef::Ref(descriptor) => decode_descriptor(cx, descriptor),
        };
    }
    match value {
        Value::Array(items) => {
            let decoded: Vec<RpcValue> = items
                .iter()
                .map(|item| decode_value(cx, item))
                .collect::<Result<_>>()?;
            // A container of plain values stays plain JSON; note the
            // elements are the decoded ones, since a malformed descriptor
            // inside may have decoded to null.
            if decoded.iter().all(|item| matches!(item, RpcValue::Json(_))) {
                let plain = decoded
                    .into_iter()
                    .map(|item| match item {
                        RpcValue::Json(json) => json,
                        _ => unreachable!("checked all items are plain"),
                    })
                    .collect();
                Ok(RpcValue::Json(Value::Array(plain)))
            } else {
                Ok(RpcValue::Array(decoded))
            }
        }
        Value::Object(entries) => {
            let decoded: BTreeMap<String, RpcValue> = entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), decode_value(cx, item)?)))
                .collect::<Result<_>>()?;
            if decoded.values().all(|item| matches!(item, RpcValue::Json(_))) {
                let plain = decoded
                    .into_iter()
                    .map(|(key, item)| match item {
                        RpcValue::Json(json) => (key, json),
                        _ => unreachable!("checked all values are plain"),
                    })
                    .collect();
                Ok(RpcValue::Json(Value::Object(plain)))
            } else {
                Ok(RpcValue::Map(decoded))
            }
        }
        other => Ok(RpcValue::Json(other.clone())),
    }
}

fn decode_descriptor(cx: &mut DecodeCx<'_>, descriptor: RefDescriptor) -> Result<RpcValue> {
    match descriptor.side {
        // Local to the sender: materialize or reuse a proxy on our side.
        Side::Local => {
            if let Some(existing) = cx.proxies.resolve(&descriptor.object_id) {
                // The sender emitted a fresh reference we do not need.
                if let Some(key) = descriptor.key() {
                    cx.redundant.push(key);
                }
                return Ok(RpcValue::Proxy(RemoteObject::from_inner(existing)));
            }
            let inner = Arc::new(ProxyInner::new(
                cx.session.clone(),
                descriptor.object_id.clone(),
                descriptor.reference_id.clone(),
            ));
            cx.proxies.register(&descriptor.object_id, &inner);
            Ok(RpcValue::Proxy(RemoteObject::from_inner(inner)))
        }
        // Remote to the sender: this names one of our own objects.
        Side::Remote => match cx.locals.resolve(&descriptor.object_id) {
            Some(object) => Ok(RpcValue::Object(object)),
            None => Err(WebrpcError::Decode(format!(
                "reference to unknown local object '{}' (a dynamic reference may have survived a state loss)",
                descriptor.object_id
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remotable::{CallResult, Exposure, Remotable};
    use serde_json::json;
    use webrpc_common::BoxFuture;

    struct Inert;

    impl Remotable for Inert {
        fn dispatch<'a>(&'a self, _method: &'a str, _params: Vec<RpcValue>) -> BoxFuture<'a, CallResult> {
            Box::pin(async { Ok(RpcValue::null()) })
        }

        fn exposure(&self, _method: &str) -> Option<Exposure> {
            None
        }
    }

    #[test]
    fn test_plain_json_passes_through() {
        let mut locals = LocalObjects::default();
        let mut outstanding = OutstandingRefs::default();
        let value = RpcValue::from(json!({"nested": [1, 2, {"x": true}]}));
        let encoded = encode_value(&mut locals, &mut outstanding, &value);
        assert_eq!(encoded, json!({"nested": [1, 2, {"x": true}]}));
        assert!(outstanding.is_empty());
    }

    #[test]
    fn test_local_object_encodes_to_fresh_reference() {
        let mut locals = LocalObjects::default();
        let mut outstanding = OutstandingRefs::default();
        let object: Arc<dyn Remotable> = Arc::new(Inert);

        let first = encode_value(&mut locals, &mut outstanding, &RpcValue::object(object.clone()));
        let second = encode_value(&mut locals, &mut outstanding, &RpcValue::object(object.clone()));

        // Same stamped object id, distinct reference ids, one strong entry each.
        assert_eq!(first["Rε"], second["Rε"]);
        assert_ne!(first["Rid"], second["Rid"]);
        assert_eq!(first["S"], json!("L"));
        let object_id = first["Rε"].as_str().unwrap();
        assert_eq!(outstanding.count_for(object_id), 2);
    }

    #[test]
    fn test_nested_object_encodes_in_place() {
        let mut locals = LocalObjects::default();
        let mut outstanding = OutstandingRefs::default();
        let object: Arc<dyn Remotable> = Arc::new(Inert);
        let value = RpcValue::Map(BTreeMap::from([(
            "callback".to_string(),
            RpcValue::object(object),
        )]));

        let encoded = encode_value(&mut locals, &mut outstanding, &value);
        assert_eq!(encoded["callback"]["S"], json!("L"));
        assert!(!outstanding.is_empty());
    }
}
