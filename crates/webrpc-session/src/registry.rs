//! Reference Bookkeeping
//!
//! Three registries implement the distributed reference-counting contract:
//!
//! - **Local objects** are held weakly, keyed by stamped object id, so the
//!   application's own reference policy drives collectability.
//! - **Outstanding references** are held strongly, one entry per reference
//!   descriptor ever emitted with a fresh reference id. This is what keeps
//!   a local object alive for the duration of any reference handed out.
//! - **Proxies** are held weakly, keyed by remote object id, collapsing
//!   duplicate descriptors back to the same handle.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use uuid::Uuid;

use crate::proxy::ProxyInner;
use crate::remotable::Remotable;

/// Weakly-held local objects with pointer-keyed identity stamping.
///
/// Object identity is stamped the first time a reference leaves this peer.
/// The stamp lives in a side table keyed by `Arc` pointer identity; the
/// table self-heals if an address is reused after the original object died.
#[derive(Default)]
pub(crate) struct LocalObjects {
    by_id: HashMap<String, Weak<dyn Remotable>>,
    ids_by_ptr: HashMap<usize, String>,
}

fn ptr_key(object: &Arc<dyn Remotable>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl LocalObjects {
    /// Returns the stamped id for an object, stamping a fresh UUID on first
    /// use, and (re-)registers the weak holder.
    pub fn id_for(&mut self, object: &Arc<dyn Remotable>) -> String {
        let key = ptr_key(object);
        if let Some(id) = self.ids_by_ptr.get(&key) {
            // Guard against address reuse: the stamp is only valid while
            // the original weak holder still points at this allocation.
            let current = self.by_id.get(id).and_then(Weak::upgrade);
            match current {
                Some(live) if Arc::ptr_eq(&live, object) => return id.clone(),
                _ => {
                    let stale = id.clone();
                    self.by_id.remove(&stale);
                    self.ids_by_ptr.remove(&key);
                }
            }
        }
        let id = Uuid::new_v4().to_string();
        self.register_as(&id, object);
        id
    }

    /// Registers an object under an explicit id (service names and the
    /// well-known session id).
    pub fn register_as(&mut self, id: &str, object: &Arc<dyn Remotable>) {
        self.by_id.insert(id.to_string(), Arc::downgrade(object));
        self.ids_by_ptr.insert(ptr_key(object), id.to_string());
    }

    /// Resolves an id to a live object, pruning the entry if it died.
    pub fn resolve(&mut self, id: &str) -> Option<Arc<dyn Remotable>> {
        match self.by_id.get(id).and_then(Weak::upgrade) {
            Some(object) => Some(object),
            None => {
                if let Some(dead) = self.by_id.remove(id) {
                    debug_assert!(dead.upgrade().is_none());
                }
                None
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}

/// Strongly-held outstanding references keyed by
/// `"<object_id>.<reference_id>"`.
#[derive(Default)]
pub(crate) struct OutstandingRefs {
    entries: HashMap<String, Arc<dyn Remotable>>,
}

impl OutstandingRefs {
    /// Records a freshly emitted reference.
    pub fn insert(&mut self, key: String, object: Arc<dyn Remotable>) {
        self.entries.insert(key, object);
    }

    /// Releases a reference on `finalizeRef`. Returns whether it existed.
    pub fn finalize(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Whether any reference is still outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of outstanding references naming the given object.
    pub fn count_for(&self, object_id: &str) -> usize {
        let prefix = format!("{}.", object_id);
        self.entries
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .count()
    }
}

/// Weakly-held proxies keyed by remote object id.
#[derive(Default)]
pub(crate) struct ProxyRegistry {
    by_id: HashMap<String, Weak<ProxyInner>>,
}

impl ProxyRegistry {
    /// Resolves a live proxy for a remote object, pruning dead entries.
    pub fn resolve(&mut self, object_id: &str) -> Option<Arc<ProxyInner>> {
        match self.by_id.get(object_id).and_then(Weak::upgrade) {
            Some(proxy) => Some(proxy),
            None => {
                self.by_id.remove(object_id);
                None
            }
        }
    }

    /// Registers a freshly materialized proxy.
    pub fn register(&mut self, object_id: &str, proxy: &Arc<ProxyInner>) {
        self.by_id
            .insert(object_id.to_string(), Arc::downgrade(proxy));
    }

    /// Removes the entry for an object if its proxy is dead. Called by the
    /// finalization timer; a live entry means the proxy was recreated in
    /// the meantime and must be left alone.
    pub fn remove_if_dead(&mut self, object_id: &str) {
        let dead = self
            .by_id
            .get(object_id)
            .map(|weak| weak.upgrade().is_none())
            .unwrap_or(false);
        if dead {
            self.by_id.remove(object_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remotable::{CallResult, Exposure};
    use crate::value::RpcValue;
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

    fn remotable() -> Arc<dyn Remotable> {
        Arc::new(Inert)
    }

    #[test]
    fn test_identity_stamp_is_stable() {
        let mut locals = LocalObjects::default();
        let object = remotable();
        let first = locals.id_for(&object);
        let second = locals.id_for(&object);
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        let mut locals = LocalObjects::default();
        let a = remotable();
        let b = remotable();
        assert_ne!(locals.id_for(&a), locals.id_for(&b));
    }

    #[test]
    fn test_resolve_prunes_dead_entries() {
        let mut locals = LocalObjects::default();
        let object = remotable();
        let id = locals.id_for(&object);
        drop(object);
        assert!(locals.resolve(&id).is_none());
        assert_eq!(locals.len(), 0);
    }

    #[test]
    fn test_outstanding_keeps_object_alive() {
        let mut locals = LocalObjects::default();
        let mut outstanding = OutstandingRefs::default();
        let object = remotable();
        let id = locals.id_for(&object);
        let key = format!("{}.ref-1", id);
        outstanding.insert(key.clone(), object.clone());

        // The application dropped its handle; the outstanding entry is the
        // sole strong holder now.
        drop(object);
        assert!(locals.resolve(&id).is_some());

        assert!(outstanding.finalize(&key));
        assert!(!outstanding.finalize(&key));
        assert!(locals.resolve(&id).is_none());
    }

    #[test]
    fn test_count_for_matches_prefix_exactly() {
        let mut outstanding = OutstandingRefs::default();
        outstanding.insert("obj.r1".into(), remotable());
        outstanding.insert("obj.r2".into(), remotable());
        outstanding.insert("objx.r1".into(), remotable());
        assert_eq!(outstanding.count_for("obj"), 2);
    }
}
