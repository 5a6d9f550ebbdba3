//! The Session State Machine
//!
//! One session per channel. The session owns every registry, correlates
//! calls with responses, dispatches inbound requests onto local objects,
//! translates errors across the wire, answers discovery and introspection
//! as ordinary RPCs, and drives the distributed reference-counting
//! machinery.
//!
//! # Identity
//!
//! The session registers itself as a service under the reserved name
//! `org.webrpc.session`, with that same string as its object id. Each
//! peer's [`Session::remote`] handle is a proxy bound to that well-known
//! id; no lifetime management applies to well-known references.
//!
//! # State Loss
//!
//! On channel state loss every in-flight request is failed so a late
//! completion can never surface a wrong value. The outstanding-reference
//! and local-object registries are retained; a new channel replaces the
//! session entirely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use webrpc_common::protocol::error::invalid_call;
use webrpc_common::protocol::reference::ref_key;
use webrpc_common::{
    BoxFuture, Channel, ErrorRegistry, Message, ParsedRef, RefDescriptor, RemoteError,
    RequestMessage, ResponseMessage, Result, ServiceError, Side, WebrpcError, WireError,
    SESSION_WELL_KNOWN_ID,
};

use crate::encode::{decode_value, encode_value, DecodeCx};
use crate::introspect::{DiscoveredService, IntrospectedService};
use crate::proxy::{ProxyInner, RemoteObject};
use crate::registry::{LocalObjects, OutstandingRefs, ProxyRegistry};
use crate::remotable::{
    CallResult, Exposure, MethodMetadata, Remotable, ServiceMetadata, SimpleType,
};
use crate::subscription::RemoteSubscription;
use crate::value::RpcValue;

/// Session policy switches. The defaults match the protocol's safe
/// posture: masked stacks, internal-error placeholders for unmarked
/// throws, and caller traces appended to remote errors.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Replace unmarked thrown errors with the internal-error placeholder
    pub safe_exceptions: bool,
    /// Strip outbound stacks down to `"<Name>: <message>"`
    pub mask_stack_traces: bool,
    /// Capture the call site and append it to deserialized remote errors
    pub add_caller_stack_traces: bool,
    /// Answer discovery and introspection RPCs
    pub introspection_enabled: bool,
    /// Debounce between a proxy dying and `finalizeRef` being sent
    pub finalization_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            safe_exceptions: true,
            mask_stack_traces: true,
            add_caller_stack_traces: true,
            introspection_enabled: true,
            finalization_delay: Duration::from_millis(1000),
        }
    }
}

/// A registered service: declarative metadata plus the singleton factory.
struct ServiceEntry {
    metadata: ServiceMetadata,
    factory: Arc<dyn Fn() -> Arc<dyn Remotable> + Send + Sync>,
}

/// One outstanding outbound request.
struct InFlight {
    responder: oneshot::Sender<Result<RpcValue>>,
    /// The pre-encode request, retained so argument objects stay alive for
    /// the full request lifetime even though the local registry is weak.
    request_hold: Vec<RpcValue>,
    caller_stack: Option<String>,
}

#[derive(Default)]
struct SessionState {
    locals: LocalObjects,
    outstanding: OutstandingRefs,
    proxies: ProxyRegistry,
    pending: HashMap<Uuid, InFlight>,
    services: HashMap<String, ServiceEntry>,
    instances: HashMap<String, Arc<dyn Remotable>>,
    finalizers: HashMap<String, AbortHandle>,
    session_object: Option<Arc<dyn Remotable>>,
    closed: bool,
}

struct SessionShared {
    channel: Arc<dyn Channel>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    errors: Mutex<ErrorRegistry>,
    lock_chain: tokio::sync::Mutex<()>,
    drops_tx: mpsc::UnboundedSender<(String, String)>,
    idle_tx: watch::Sender<bool>,
}

/// Clonable handle to the protocol state machine for one channel.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
    ignore_locks: bool,
}

impl Session {
    /// Creates a session over a channel with default options.
    pub fn new(channel: Arc<dyn Channel>) -> Session {
        Self::with_options(channel, SessionOptions::default())
    }

    /// Creates a session over a channel.
    pub fn with_options(channel: Arc<dyn Channel>, options: SessionOptions) -> Session {
        let (drops_tx, drops_rx) = mpsc::unbounded_channel();
        let (idle_tx, _) = watch::channel(true);
        let shared = Arc::new_cyclic(|weak: &Weak<SessionShared>| {
            let session_object: Arc<dyn Remotable> = Arc::new(SessionObject {
                shared: weak.clone(),
            });
            let mut state = SessionState::default();
            state
                .locals
                .register_as(SESSION_WELL_KNOWN_ID, &session_object);
            let singleton = session_object.clone();
            state.services.insert(
                SESSION_WELL_KNOWN_ID.to_string(),
                ServiceEntry {
                    metadata: session_service_metadata(),
                    factory: Arc::new(move || singleton.clone()),
                },
            );
            state
                .instances
                .insert(SESSION_WELL_KNOWN_ID.to_string(), session_object.clone());
            state.session_object = Some(session_object);
            SessionShared {
                channel,
                options,
                state: Mutex::new(state),
                errors: Mutex::new(ErrorRegistry::new()),
                lock_chain: tokio::sync::Mutex::new(()),
                drops_tx,
                idle_tx,
            }
        });
        let session = Session {
            shared,
            ignore_locks: false,
        };
        session.spawn_loops(drops_rx);
        session
    }

    /// The proxy for the peer's session object, bound to the well-known id.
    pub fn remote(&self) -> RemoteObject {
        let mut state = self.lock_state();
        if let Some(existing) = state.proxies.resolve(SESSION_WELL_KNOWN_ID) {
            return RemoteObject::from_inner(existing);
        }
        let inner = Arc::new(ProxyInner::new(
            self.clone(),
            SESSION_WELL_KNOWN_ID.to_string(),
            None,
        ));
        state.proxies.register(SESSION_WELL_KNOWN_ID, &inner);
        RemoteObject::from_inner(inner)
    }

    /// Registers a service by metadata and singleton factory.
    ///
    /// The instance is created on the first `getLocalService` request and
    /// registered under the service name as its object id.
    pub fn register_service<F>(&self, metadata: ServiceMetadata, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn Remotable> + Send + Sync + 'static,
    {
        let mut state = self.lock_state();
        if state.services.contains_key(&metadata.name) {
            return Err(WebrpcError::DuplicateService(metadata.name));
        }
        state.services.insert(
            metadata.name.clone(),
            ServiceEntry {
                metadata,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Fetches the peer's service singleton by name.
    pub async fn get_remote_service(&self, name: &str) -> Result<Option<RemoteObject>> {
        let result = self
            .remote()
            .call("getLocalService", vec![RpcValue::from(name)])
            .await?;
        match result {
            RpcValue::Proxy(proxy) => Ok(Some(proxy)),
            _ => Ok(None),
        }
    }

    /// Lists the peer's discoverable services.
    pub async fn discover_remote_services(&self) -> Result<Vec<DiscoveredService>> {
        let result = self.remote().call("getDiscoverableServices", vec![]).await?;
        let value = result.as_json().cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Fetches introspection for one of the peer's services.
    pub async fn introspect_remote_service(
        &self,
        name: &str,
    ) -> Result<Option<IntrospectedService>> {
        let result = self
            .remote()
            .call("getServiceIntrospection", vec![RpcValue::from(name)])
            .await?;
        match result.as_json() {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Registers an additional error kind with the default factory.
    pub fn register_error_type(&self, kind: &str) {
        self.shared
            .errors
            .lock()
            .expect("error registry lock poisoned")
            .register(kind);
    }

    /// Registers an additional error kind with an explicit factory.
    pub fn register_error_type_with<F>(&self, kind: &str, factory: F)
    where
        F: Fn(&WireError) -> RemoteError + Send + Sync + 'static,
    {
        self.shared
            .errors
            .lock()
            .expect("error registry lock poisoned")
            .register_with(kind, factory);
    }

    /// Invokes a method on a remote object.
    pub async fn call(
        &self,
        receiver: &RemoteObject,
        method: &str,
        params: Vec<RpcValue>,
    ) -> Result<RpcValue> {
        self.call_with_metadata(receiver, method, params, Map::new())
            .await
    }

    /// Invokes a method on a remote object, attaching call metadata.
    pub async fn call_with_metadata(
        &self,
        receiver: &RemoteObject,
        method: &str,
        params: Vec<RpcValue>,
        metadata: Map<String, Value>,
    ) -> Result<RpcValue> {
        if !self.ignore_locks {
            // Await the lock chain without joining it.
            let _gate = self.shared.lock_chain.lock().await;
        }
        let caller_stack = self
            .shared
            .options
            .add_caller_stack_traces
            .then(capture_caller_trace);

        let (id, frame, responder) = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(WebrpcError::ChannelClosed);
            }
            let SessionState {
                locals,
                outstanding,
                ..
            } = &mut *state;
            let receiver_value = encode_value(locals, outstanding, &RpcValue::Proxy(receiver.clone()));
            let parameters = params
                .iter()
                .map(|param| encode_value(locals, outstanding, param))
                .collect();
            let request = RequestMessage::new(receiver_value, method, parameters)
                .with_metadata(metadata);
            let id = request.id;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(
                id,
                InFlight {
                    responder: tx,
                    request_hold: params,
                    caller_stack,
                },
            );
            let frame = Message::Request(request).to_frame()?;
            self.refresh_idle(&state);
            (id, frame, rx)
        };

        if let Err(send_error) = self.shared.channel.send(frame).await {
            let mut state = self.lock_state();
            state.pending.remove(&id);
            self.refresh_idle(&state);
            return Err(send_error);
        }

        match responder.await {
            Ok(outcome) => outcome,
            Err(_) => Err(WebrpcError::ChannelClosed),
        }
    }

    /// Serializes work through the session's lock chain.
    ///
    /// Calls made through any other handle wait until `f` completes. The
    /// handle passed into `f` is exempt from the lock; calls made inside
    /// `f` with the outer handle would deadlock.
    pub async fn lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Session) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _guard = self.shared.lock_chain.lock().await;
        let exempt = Session {
            shared: self.shared.clone(),
            ignore_locks: true,
        };
        f(exempt).await
    }

    /// Whether no in-flight requests and no outstanding references remain.
    pub fn is_idle(&self) -> bool {
        let state = self.lock_state();
        state.pending.is_empty() && state.outstanding.is_empty()
    }

    /// Idle observation; late subscribers observe the current state.
    pub fn idle(&self) -> watch::Receiver<bool> {
        self.shared.idle_tx.subscribe()
    }

    /// Number of outstanding references retained for one local object.
    pub fn outstanding_references(&self, object_id: &str) -> usize {
        self.lock_state().outstanding.count_for(object_id)
    }

    /// Resolves a local object by its stamped id.
    pub fn resolve_local(&self, object_id: &str) -> Option<Arc<dyn Remotable>> {
        self.lock_state().locals.resolve(object_id)
    }

    /// Downgrades to a weak handle that does not keep the session alive.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Fails in-flight work, cancels pending finalizations and closes the
    /// channel.
    pub fn close(&self) {
        {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            for (_, finalizer) in state.finalizers.drain() {
                finalizer.abort();
            }
        }
        self.fail_in_flight(|| WebrpcError::ChannelClosed);
        self.shared.channel.close();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.shared.state.lock().expect("session state lock poisoned")
    }

    fn spawn_loops(&self, mut drops_rx: mpsc::UnboundedReceiver<(String, String)>) {
        if let Some(mut frames) = self.shared.channel.take_frames() {
            let session = self.clone();
            tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    if let Err(fatal) = session.handle_frame(&frame).await {
                        error!(error = %fatal, "failed to decode incoming frame; closing session");
                        session.close();
                        return;
                    }
                }
                debug!("channel frame stream ended");
                session.fail_in_flight(|| WebrpcError::ChannelClosed);
            });
        }

        let session = self.clone();
        let mut lost = self.shared.channel.state_lost();
        tokio::spawn(async move {
            while let Ok(reason) = lost.recv().await {
                warn!(reason = %reason, "channel state lost; failing in-flight requests");
                session.fail_in_flight(|| WebrpcError::state_lost(reason.clone()));
            }
        });

        let session = self.clone();
        tokio::spawn(async move {
            while let Some((object_id, reference_id)) = drops_rx.recv().await {
                session.schedule_finalization(object_id, reference_id);
            }
        });
    }

    pub(crate) fn notify_proxy_dropped(&self, object_id: String, reference_id: String) {
        let _ = self.shared.drops_tx.send((object_id, reference_id));
    }

    /// Starts the finalization debounce for a dead proxy's reference. The
    /// registry entry is only removed if the proxy is still dead when the
    /// timer fires; a live entry means a new descriptor arrived in the
    /// window and recreated it.
    fn schedule_finalization(&self, object_id: String, reference_id: String) {
        let key = ref_key(&object_id, &reference_id);
        let delay = self.shared.options.finalization_delay;
        let session = self.clone();
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = session.lock_state();
                state.finalizers.remove(&timer_key);
                if state.closed {
                    return;
                }
                state.proxies.remove_if_dead(&object_id);
            }
            session.send_finalize_ref(&timer_key).await;
        });
        let mut state = self.lock_state();
        if state.closed {
            handle.abort();
            return;
        }
        state.finalizers.insert(key, handle.abort_handle());
    }

    /// Tells the peer to release one outstanding reference. Failures are
    /// logged, not surfaced: the reference is already unreachable here.
    async fn send_finalize_ref(&self, key: &str) {
        let remote = self.remote();
        if let Err(release_error) = remote
            .call("finalizeRef", vec![RpcValue::from(key)])
            .await
        {
            debug!(reference = %key, error = %release_error, "finalizeRef not delivered");
        }
    }

    fn fail_in_flight<E>(&self, make_error: E)
    where
        E: Fn() -> WebrpcError,
    {
        let drained: Vec<InFlight> = {
            let mut state = self.lock_state();
            let drained = state.pending.drain().map(|(_, entry)| entry).collect();
            self.refresh_idle(&state);
            drained
        };
        for entry in drained {
            let _ = entry.responder.send(Err(make_error()));
        }
    }

    fn refresh_idle(&self, state: &SessionState) {
        let idle = state.pending.is_empty() && state.outstanding.is_empty();
        self.shared.idle_tx.send_replace(idle);
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        let frame = message.to_frame()?;
        self.shared.channel.send(frame).await
    }

    async fn handle_frame(&self, frame: &str) -> Result<()> {
        match Message::from_frame(frame)? {
            Message::Request(request) => self.handle_request(request).await,
            Message::Response(response) => self.handle_response(response),
            Message::Ping => {
                let session = self.clone();
                tokio::spawn(async move {
                    if let Err(reply_error) = session.send_message(Message::Pong).await {
                        debug!(error = %reply_error, "pong not delivered");
                    }
                });
                Ok(())
            }
            Message::Pong => Ok(()),
            Message::Event(event) => {
                debug!(name = %event.name, "ignoring reserved event envelope");
                Ok(())
            }
        }
    }

    /// Dispatches one inbound request. Returns an error only for fatal
    /// parameter-decode failures; receiver problems become `invalid-call`
    /// responses.
    async fn handle_request(&self, request: RequestMessage) -> Result<()> {
        let id = request.id;

        let receiver = match self.resolve_receiver(&request.receiver) {
            Ok(receiver) => receiver,
            Err(code) => {
                self.respond_invalid_call(id, code, None).await;
                return Ok(());
            }
        };

        let (params, redundant) = {
            let mut state = self.lock_state();
            let SessionState {
                locals, proxies, ..
            } = &mut *state;
            let mut cx = DecodeCx {
                session: self,
                locals,
                proxies,
                redundant: Vec::new(),
            };
            let params: Vec<RpcValue> = request
                .parameters
                .iter()
                .map(|parameter| decode_value(&mut cx, parameter))
                .collect::<Result<_>>()?;
            (params, cx.redundant)
        };
        self.finalize_redundant(redundant);

        let exposed = receiver.allows_all_calls()
            || matches!(
                receiver.exposure(&request.method),
                Some(Exposure::Call) | Some(Exposure::Any)
            );
        if !exposed {
            self.respond_invalid_call(
                id,
                invalid_call::NO_SUCH_METHOD,
                Some(format!("No such method '{}'", request.method)),
            )
            .await;
            return Ok(());
        }

        let session = self.clone();
        let method = request.method;
        tokio::spawn(async move {
            let result = receiver.dispatch(&method, params).await;
            let response = match result {
                Ok(value) => {
                    let encoded = {
                        let mut state = session.lock_state();
                        let SessionState {
                            locals,
                            outstanding,
                            ..
                        } = &mut *state;
                        let encoded = encode_value(locals, outstanding, &value);
                        session.refresh_idle(&state);
                        encoded
                    };
                    ResponseMessage::success(id, encoded)
                }
                Err(thrown) => ResponseMessage::error(id, session.wire_error_for(&method, thrown)),
            };
            if let Err(send_error) = session.send_message(Message::Response(response)).await {
                debug!(error = %send_error, "response not delivered");
            }
        });
        Ok(())
    }

    /// Resolves the receiver descriptor to a local object, mapping each
    /// failure to its `invalid-call` code.
    fn resolve_receiver(&self, receiver: &Value) -> std::result::Result<Arc<dyn Remotable>, &'static str> {
        if receiver.is_null() {
            return Err(invalid_call::NO_RECEIVER_SPECIFIED);
        }
        let descriptor = match RefDescriptor::from_value(receiver) {
            Some(ParsedRef::Ref(descriptor)) => descriptor,
            Some(ParsedRef::Undefined) | None => return Err(invalid_call::NO_RECEIVER_SPECIFIED),
        };
        // Only references to objects local to us are dispatchable.
        if descriptor.side != Side::Remote {
            return Err(invalid_call::NO_SUCH_RECEIVER);
        }
        self.lock_state()
            .locals
            .resolve(&descriptor.object_id)
            .ok_or(invalid_call::NO_SUCH_RECEIVER)
    }

    fn finalize_redundant(&self, redundant: Vec<String>) {
        for key in redundant {
            let session = self.clone();
            tokio::spawn(async move {
                session.send_finalize_ref(&key).await;
            });
        }
    }

    async fn respond_invalid_call(&self, id: Uuid, code: &str, message: Option<String>) {
        let mut error = Map::new();
        error.insert("code".into(), Value::String("invalid-call".into()));
        match message {
            Some(message) => {
                error.insert("message".into(), Value::String(message));
            }
            None => {
                error.insert("reason".into(), Value::String(code.into()));
            }
        }
        let response = ResponseMessage::error(id, Value::Object(error));
        if let Err(send_error) = self.send_message(Message::Response(response)).await {
            debug!(error = %send_error, "invalid-call response not delivered");
        }
    }

    /// Applies the safe-exceptions and stack-masking policy to a thrown
    /// error before it goes on the wire.
    fn wire_error_for(&self, method: &str, thrown: ServiceError) -> Value {
        let options = &self.shared.options;
        if options.safe_exceptions && !thrown.intentional {
            error!(
                method = %method,
                name = %thrown.error.name,
                message = %thrown.error.message,
                stack = %thrown.error.stack.as_deref().unwrap_or("<none>"),
                "unhandled error in remote method call"
            );
            return WireError::internal_placeholder().to_value(options.mask_stack_traces);
        }
        thrown.error.to_value(options.mask_stack_traces)
    }

    fn handle_response(&self, response: ResponseMessage) -> Result<()> {
        if let Some(error_value) = response.error {
            let entry = {
                let mut state = self.lock_state();
                let entry = state.pending.remove(&response.id);
                self.refresh_idle(&state);
                entry
            };
            let Some(entry) = entry else {
                warn!(id = %response.id, "response for unknown request; dropping");
                return Ok(());
            };
            let outcome = self.translate_wire_error(error_value, entry.caller_stack.as_deref());
            let _ = entry.responder.send(Err(outcome));
            return Ok(());
        }

        let value = response.value.unwrap_or(Value::Null);
        let (decoded, redundant, entry) = {
            let mut state = self.lock_state();
            let SessionState {
                locals,
                proxies,
                pending,
                ..
            } = &mut *state;
            let mut cx = DecodeCx {
                session: self,
                locals,
                proxies,
                redundant: Vec::new(),
            };
            let decoded = decode_value(&mut cx, &value)?;
            let redundant = cx.redundant;
            let entry = pending.remove(&response.id);
            self.refresh_idle(&state);
            (decoded, redundant, entry)
        };
        self.finalize_redundant(redundant);
        match entry {
            Some(entry) => {
                let _ = entry.responder.send(Ok(decoded));
            }
            None => warn!(id = %response.id, "response for unknown request; dropping"),
        }
        Ok(())
    }

    /// Turns a wire error value into the caller-facing error, appending
    /// the captured caller trace when enabled.
    fn translate_wire_error(&self, error_value: Value, caller_stack: Option<&str>) -> WebrpcError {
        if let Some(map) = error_value.as_object() {
            if map.get("code").and_then(Value::as_str) == Some("invalid-call") {
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or(invalid_call::NO_SUCH_METHOD);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(reason);
                return WebrpcError::invalid_call(reason, message);
            }
        }
        let mut remote = self
            .shared
            .errors
            .lock()
            .expect("error registry lock poisoned")
            .deserialize(&error_value);
        if self.shared.options.add_caller_stack_traces {
            if let Some(trace) = caller_stack {
                remote.append_caller_trace(trace);
            }
        }
        WebrpcError::Remote(remote)
    }

    // ------------------------------------------------------------------
    // Built-in session service operations
    // ------------------------------------------------------------------

    fn get_or_create_service_instance(&self, name: &str) -> Option<Arc<dyn Remotable>> {
        let mut state = self.lock_state();
        if let Some(existing) = state.instances.get(name) {
            return Some(existing.clone());
        }
        let factory = state.services.get(name)?.factory.clone();
        let instance = factory();
        state.instances.insert(name.to_string(), instance.clone());
        state.locals.register_as(name, &instance);
        Some(instance)
    }

    fn finalize_local_ref(&self, key: &str) {
        let mut state = self.lock_state();
        if !state.outstanding.finalize(key) {
            debug!(reference = %key, "finalizeRef for unknown reference");
        }
        self.refresh_idle(&state);
    }

    fn discoverable_services(&self) -> Vec<DiscoveredService> {
        if !self.shared.options.introspection_enabled {
            return Vec::new();
        }
        let state = self.lock_state();
        let mut services: Vec<DiscoveredService> = state
            .services
            .values()
            .filter(|entry| entry.metadata.discoverable)
            .map(|entry| DiscoveredService::from(&entry.metadata))
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    fn service_introspection(&self, name: &str) -> Option<IntrospectedService> {
        if !self.shared.options.introspection_enabled {
            return None;
        }
        let state = self.lock_state();
        let entry = state.services.get(name)?;
        entry
            .metadata
            .introspectable
            .then(|| IntrospectedService::from(&entry.metadata))
    }
}

/// Weak counterpart of [`Session`], used by caches that must not extend
/// the session's lifetime.
#[derive(Clone)]
pub struct WeakSession {
    shared: Weak<SessionShared>,
}

impl WeakSession {
    /// Upgrades back to a full handle if the session is still alive.
    pub fn upgrade(&self) -> Option<Session> {
        self.shared.upgrade().map(|shared| Session {
            shared,
            ignore_locks: false,
        })
    }
}

/// The remotable the session registers under the well-known id. Holds the
/// shared state weakly so the session's own registries never keep it
/// alive circularly.
struct SessionObject {
    shared: Weak<SessionShared>,
}

impl SessionObject {
    fn session(&self) -> Option<Session> {
        self.shared.upgrade().map(|shared| Session {
            shared,
            ignore_locks: false,
        })
    }
}

impl Remotable for SessionObject {
    fn dispatch<'a>(&'a self, method: &'a str, mut params: Vec<RpcValue>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let Some(session) = self.session() else {
                return Err(ServiceError::from(WireError::generic("session closed")));
            };
            match method {
                "getLocalService" => {
                    let name = string_param(&params, 0, "name")?;
                    Ok(match session.get_or_create_service_instance(&name) {
                        Some(instance) => RpcValue::object(instance),
                        None => RpcValue::null(),
                    })
                }
                "finalizeRef" => {
                    let key = string_param(&params, 0, "ref")?;
                    session.finalize_local_ref(&key);
                    Ok(RpcValue::null())
                }
                "subscribeToEvent" => {
                    if params.len() < 3 {
                        return Err(ServiceError::from(WireError::generic(
                            "subscribeToEvent requires (eventSource, name, observer)",
                        )));
                    }
                    let observer = params.remove(2);
                    let name = string_param(&params, 1, "name")?;
                    let source = params.remove(0);
                    subscribe_to_event(source, &name, observer)
                }
                "getDiscoverableServices" => {
                    let services = session.discoverable_services();
                    Ok(RpcValue::Json(serde_json::to_value(services).map_err(
                        |serialize_error| {
                            ServiceError::from(WireError::generic(serialize_error.to_string()))
                        },
                    )?))
                }
                "getServiceIntrospection" => {
                    let name = string_param(&params, 0, "name")?;
                    let introspection = session.service_introspection(&name);
                    Ok(RpcValue::Json(
                        serde_json::to_value(introspection).map_err(|serialize_error| {
                            ServiceError::from(WireError::generic(serialize_error.to_string()))
                        })?,
                    ))
                }
                other => Err(ServiceError::from(WireError::generic(format!(
                    "No such method '{}'",
                    other
                )))),
            }
        })
    }

    fn exposure(&self, method: &str) -> Option<Exposure> {
        matches!(
            method,
            "getLocalService"
                | "finalizeRef"
                | "subscribeToEvent"
                | "getDiscoverableServices"
                | "getServiceIntrospection"
        )
        .then_some(Exposure::Any)
    }
}

fn string_param(params: &[RpcValue], index: usize, name: &str) -> std::result::Result<String, ServiceError> {
    params
        .get(index)
        .and_then(|param| param.as_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            ServiceError::from(WireError::type_error(format!(
                "parameter '{}' must be a string",
                name
            )))
        })
}

/// Wires an observer (remote proxy or local object) onto a named event of
/// a local event source and returns the remote-subscription remotable.
fn subscribe_to_event(source: RpcValue, name: &str, observer: RpcValue) -> CallResult {
    let Some(source) = source.as_object() else {
        return Err(ServiceError::from(WireError::generic(
            "eventSource does not resolve to a local object",
        )));
    };
    let Some(event) = source.event(name) else {
        return Err(ServiceError::from(WireError::generic(format!(
            "No such event '{}'",
            name
        ))));
    };
    let observer: Arc<dyn Fn(RpcValue) + Send + Sync> = match observer {
        RpcValue::Proxy(proxy) => Arc::new(move |value: RpcValue| {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                if let Err(delivery_error) = proxy.call("next", vec![value]).await {
                    debug!(error = %delivery_error, "event delivery failed");
                }
            });
        }),
        RpcValue::Object(object) => Arc::new(move |value: RpcValue| {
            let object = object.clone();
            tokio::spawn(async move {
                if let Err(delivery_error) = object.dispatch("next", vec![value]).await {
                    debug!(error = %delivery_error.error.message, "event delivery failed");
                }
            });
        }),
        _ => {
            return Err(ServiceError::from(WireError::generic(
                "observer must be a remotable",
            )))
        }
    };
    let subscription = event.subscribe(observer);
    Ok(RpcValue::object(RemoteSubscription::new(
        subscription,
        name.to_string(),
    )))
}

/// Metadata for the session's own service entry.
fn session_service_metadata() -> ServiceMetadata {
    ServiceMetadata::builder(SESSION_WELL_KNOWN_ID)
        .description("WebRPC session service")
        .method(
            MethodMetadata::new("getLocalService")
                .description("Fetch a service singleton by name")
                .returns(SimpleType::Object)
                .parameter("name", SimpleType::String),
        )
        .method(
            MethodMetadata::new("finalizeRef")
                .description("Release one outstanding reference")
                .returns(SimpleType::Void)
                .parameter("ref", SimpleType::String),
        )
        .method(
            MethodMetadata::new("subscribeToEvent")
                .description("Subscribe an observer to a named event")
                .returns(SimpleType::Object)
                .parameter("eventSource", SimpleType::Object)
                .parameter("name", SimpleType::String)
                .parameter("observer", SimpleType::Object),
        )
        .method(
            MethodMetadata::new("getDiscoverableServices")
                .description("List discoverable services")
                .returns(SimpleType::Array),
        )
        .method(
            MethodMetadata::new("getServiceIntrospection")
                .description("Introspect a service by name")
                .returns(SimpleType::Object)
                .parameter("name", SimpleType::String),
        )
        .build()
}

/// Captures the local call-site trace, trimmed to start after the session
/// call machinery.
fn capture_caller_trace() -> String {
    let backtrace = std::backtrace::Backtrace::force_capture().to_string();
    let lines: Vec<&str> = backtrace.lines().collect();
    let boundary = lines
        .iter()
        .rposition(|line| line.contains("Session") && line.contains("call"));
    match boundary {
        Some(index) if index + 1 < lines.len() => lines[index + 1..].join("\n"),
        _ => backtrace,
    }
}
