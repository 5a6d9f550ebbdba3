//! Remotable Objects, Events and Service Metadata
//!
//! A remotable is a value whose identity persists across the wire via a
//! reference descriptor rather than being deep-copied. In this
//! implementation a remotable exposes its methods through a string-keyed
//! dispatch table and its observable events through [`EventSource`]
//! handles.
//!
//! Service metadata is declarative: since Rust has no decorators, the tags
//! that would be attached to classes, methods and events are supplied at
//! registration time through the [`ServiceMetadata`] builder and consumed
//! to answer the introspection RPCs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use webrpc_common::{BoxFuture, ServiceError};

use crate::value::RpcValue;

/// Result of invoking a method through the dispatch table.
pub type CallResult = std::result::Result<RpcValue, ServiceError>;

/// How a method is exposed to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Callable as an ordinary method
    Call,
    /// Callable in any role
    Any,
}

/// A value invocable and observable from the remote peer.
///
/// Implementations route method names through [`Remotable::dispatch`]; the
/// session checks [`Remotable::exposure`] first unless the receiver opts
/// into the allow-all-calls bypass.
pub trait Remotable: Send + Sync + 'static {
    /// Invokes a method by name. Unknown names should return an error, but
    /// the session never routes names that fail the exposure check.
    fn dispatch<'a>(&'a self, method: &'a str, params: Vec<RpcValue>) -> BoxFuture<'a, CallResult>;

    /// Exposure tag for a method name; `None` means not exposed.
    fn exposure(&self, method: &str) -> Option<Exposure>;

    /// Named observable event, if this object publishes one.
    fn event(&self, _name: &str) -> Option<EventSource> {
        None
    }

    /// Receivers with this bypass skip the exposure check entirely.
    fn allows_all_calls(&self) -> bool {
        false
    }
}

/// Observer callback invoked on each event emission.
pub type Observer = Arc<dyn Fn(RpcValue) + Send + Sync>;

struct EventInner {
    name: String,
    observers: Mutex<HashMap<u64, Observer>>,
    next_id: AtomicU64,
}

/// A lightweight per-event pub/sub primitive.
///
/// Two operations: `subscribe(observer)` returning a handle, and
/// `unsubscribe` through that handle. Emission fans out synchronously to
/// every observer registered at that moment.
#[derive(Clone)]
pub struct EventSource {
    inner: Arc<EventInner>,
}

impl EventSource {
    /// Creates an event source with the given wire name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                name: name.into(),
                observers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The wire name of this event.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registers an observer; the returned handle unsubscribes it.
    pub fn subscribe(&self, observer: Observer) -> EventSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .expect("observer lock poisoned")
            .insert(id, observer);
        EventSubscription {
            id,
            source: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers a value to every current observer.
    pub fn emit(&self, value: RpcValue) {
        let observers: Vec<Observer> = self
            .inner
            .observers
            .lock()
            .expect("observer lock poisoned")
            .values()
            .cloned()
            .collect();
        for observer in observers {
            observer(value.clone());
        }
    }

    /// Number of currently registered observers.
    pub fn observer_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .expect("observer lock poisoned")
            .len()
    }
}

/// Handle to a single observer registration.
pub struct EventSubscription {
    id: u64,
    source: Weak<EventInner>,
}

impl EventSubscription {
    /// Removes the observer. Idempotent; harmless after the source is gone.
    pub fn unsubscribe(&self) {
        if let Some(source) = self.source.upgrade() {
            source
                .observers
                .lock()
                .expect("observer lock poisoned")
                .remove(&self.id);
        }
    }
}

/// Simple type names surfaced by introspection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SimpleType {
    String,
    Number,
    Bigint,
    Boolean,
    Object,
    Array,
    Void,
    Undefined,
    Null,
    Unknown,
}

/// Declarative tags for one service, consumed by discovery and
/// introspection.
#[derive(Debug, Clone)]
pub struct ServiceMetadata {
    pub name: String,
    pub description: String,
    /// Whether the service appears in `getDiscoverableServices`
    pub discoverable: bool,
    /// Whether `getServiceIntrospection` answers for this service
    pub introspectable: bool,
    pub methods: Vec<MethodMetadata>,
    pub events: Vec<EventMetadata>,
}

/// Tags for one exposed method.
#[derive(Debug, Clone)]
pub struct MethodMetadata {
    pub name: String,
    pub description: String,
    pub simple_return_type: SimpleType,
    pub parameters: Vec<ParameterMetadata>,
}

/// Tags for one method parameter.
#[derive(Debug, Clone)]
pub struct ParameterMetadata {
    pub name: String,
    pub description: String,
    pub simple_type: SimpleType,
}

/// Tags for one observable event.
#[derive(Debug, Clone)]
pub struct EventMetadata {
    pub name: String,
    pub description: String,
}

impl ServiceMetadata {
    /// Starts a metadata builder for a named service. Discoverable and
    /// introspectable default to true.
    pub fn builder(name: impl Into<String>) -> ServiceMetadataBuilder {
        ServiceMetadataBuilder {
            metadata: ServiceMetadata {
                name: name.into(),
                description: String::new(),
                discoverable: true,
                introspectable: true,
                methods: Vec::new(),
                events: Vec::new(),
            },
        }
    }
}

/// Builder for [`ServiceMetadata`].
pub struct ServiceMetadataBuilder {
    metadata: ServiceMetadata,
}

impl ServiceMetadataBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    pub fn discoverable(mut self, discoverable: bool) -> Self {
        self.metadata.discoverable = discoverable;
        self
    }

    pub fn introspectable(mut self, introspectable: bool) -> Self {
        self.metadata.introspectable = introspectable;
        self
    }

    pub fn method(mut self, method: MethodMetadata) -> Self {
        self.metadata.methods.push(method);
        self
    }

    pub fn event(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.metadata.events.push(EventMetadata {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn build(self) -> ServiceMetadata {
        self.metadata
    }
}

impl MethodMetadata {
    /// Starts a method description with an unknown return type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            simple_return_type: SimpleType::Unknown,
            parameters: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn returns(mut self, simple_return_type: SimpleType) -> Self {
        self.simple_return_type = simple_return_type;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, simple_type: SimpleType) -> Self {
        self.parameters.push(ParameterMetadata {
            name: name.into(),
            description: String::new(),
            simple_type,
        });
        self
    }
}
