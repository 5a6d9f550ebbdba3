// Error-translation tests: safe-exceptions masking, intentional errors,
// the standard kind matrix, stack masking, and caller traces.

use std::sync::Arc;

use webrpc::{
    raise, CallResult, Exposure, MemoryChannel, Remotable, RemoteError, RpcValue, ServiceError,
    ServiceMetadata, Session, SessionOptions, WebrpcError, WireError,
};
use webrpc_common::protocol::wire_error::{CALLER_TRACE_DELIMITER, INTERNAL_ERROR};
use webrpc_common::BoxFuture;

// ============================================================================
// Test Helpers
// ============================================================================

/// Service that throws on demand.
struct Chaos;

impl Remotable for Chaos {
    fn dispatch<'a>(&'a self, method: &'a str, params: Vec<RpcValue>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            match method {
                "throwUnmarked" => Err(ServiceError::from(
                    WireError::type_error("x").with_stack("TypeError: x\n    at chaos_service (chaos.rs:1)"),
                )),
                "throwIntentional" => Err(raise(
                    WireError::type_error("x").with_stack("TypeError: x\n    at chaos_service (chaos.rs:1)"),
                )),
                "throwKind" => {
                    let kind = params[0].as_str().unwrap_or("GenericError").to_string();
                    let message = params[1].as_str().unwrap_or_default().to_string();
                    Err(raise(WireError::new(kind, message)))
                }
                "throwAggregate" => Err(raise(WireError::aggregate(
                    "several things failed",
                    vec![
                        WireError::type_error("first"),
                        WireError::range_error("second"),
                    ],
                ))),
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
            "throwUnmarked" | "throwIntentional" | "throwKind" | "throwAggregate"
        )
        .then_some(Exposure::Call)
    }
}

fn chaos_metadata() -> ServiceMetadata {
    ServiceMetadata::builder("chaos").build()
}

fn sessions_with_server_options(options: SessionOptions) -> (Session, Session) {
    let (near, far) = MemoryChannel::pair();
    let server = Session::with_options(far, options);
    let client = Session::new(near);
    let chaos: Arc<dyn Remotable> = Arc::new(Chaos);
    server
        .register_service(chaos_metadata(), move || chaos.clone())
        .unwrap();
    (server, client)
}

fn remote_error(error: WebrpcError) -> RemoteError {
    match error {
        WebrpcError::Remote(remote) => remote,
        other => panic!("expected a remote error, got {}", other),
    }
}

// ============================================================================
// Safe exceptions
// ============================================================================

#[tokio::test]
async fn test_unmarked_error_masked_to_internal() {
    let (_server, client) = sessions_with_server_options(SessionOptions::default());
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    let failure = chaos.call("throwUnmarked", vec![]).await.unwrap_err();
    let remote = remote_error(failure);

    // The true TypeError stays on the throwing side; the caller sees the
    // neutral placeholder.
    assert!(remote.is_kind(INTERNAL_ERROR));
    assert_ne!(remote.message, "x");
    assert!(!remote.stack.as_deref().unwrap_or("").contains("chaos.rs"));
}

#[tokio::test]
async fn test_intentional_error_crosses_unmasked() {
    let (_server, client) = sessions_with_server_options(SessionOptions::default());
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    let failure = chaos.call("throwIntentional", vec![]).await.unwrap_err();
    let remote = remote_error(failure);

    assert!(remote.is_kind("TypeError"));
    assert_eq!(remote.name, "TypeError");
    assert_eq!(remote.message, "x");
    // Stack masking still applies to intentional errors.
    assert!(remote.stack.as_deref().unwrap().starts_with("TypeError: x"));
    assert!(!remote.stack.as_deref().unwrap().contains("chaos.rs"));
}

// ============================================================================
// Kind matrix and masking policy
// ============================================================================

#[tokio::test]
async fn test_standard_error_kinds_round_trip() {
    let (_server, client) = sessions_with_server_options(SessionOptions::default());
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    for kind in [
        "GenericError",
        "EvalError",
        "RangeError",
        "ReferenceError",
        "SyntaxError",
        "TypeError",
        "URIError",
    ] {
        let failure = chaos
            .call(
                "throwKind",
                vec![RpcValue::from(kind), RpcValue::from("boom")],
            )
            .await
            .unwrap_err();
        let remote = remote_error(failure);
        assert!(remote.is_kind(kind), "kind {} did not round-trip", kind);
        assert_eq!(remote.name, kind);
        assert_eq!(remote.message, "boom");
    }
}

#[tokio::test]
async fn test_stack_preserved_when_masking_disabled() {
    let options = SessionOptions {
        safe_exceptions: false,
        mask_stack_traces: false,
        ..SessionOptions::default()
    };
    let (_server, client) = sessions_with_server_options(options);
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    let failure = chaos.call("throwUnmarked", vec![]).await.unwrap_err();
    let remote = remote_error(failure);

    assert!(remote.is_kind("TypeError"));
    assert!(remote.stack.as_deref().unwrap().contains("chaos.rs:1"));
}

#[tokio::test]
async fn test_caller_trace_appended_to_remote_error() {
    let (_server, client) = sessions_with_server_options(SessionOptions::default());
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    let failure = chaos.call("throwIntentional", vec![]).await.unwrap_err();
    let remote = remote_error(failure);

    let stack = remote.stack.unwrap();
    assert!(stack.contains(CALLER_TRACE_DELIMITER));
}

#[tokio::test]
async fn test_aggregate_error_children_round_trip() {
    let (_server, client) = sessions_with_server_options(SessionOptions::default());
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    let failure = chaos.call("throwAggregate", vec![]).await.unwrap_err();
    let remote = remote_error(failure);

    assert!(remote.is_kind("AggregateError"));
    assert_eq!(remote.errors.len(), 2);
    assert!(remote.errors[0].is_kind("TypeError"));
    assert_eq!(remote.errors[0].message, "first");
    assert!(remote.errors[1].is_kind("RangeError"));
}

#[tokio::test]
async fn test_registered_custom_kind_resolves() {
    let (_server, client) = sessions_with_server_options(SessionOptions::default());
    client.register_error_type("FrobnicationError");
    let chaos = client.get_remote_service("chaos").await.unwrap().unwrap();

    let failure = chaos
        .call(
            "throwKind",
            vec![
                RpcValue::from("FrobnicationError"),
                RpcValue::from("gears jammed"),
            ],
        )
        .await
        .unwrap_err();
    let remote = remote_error(failure);
    assert!(remote.is_kind("FrobnicationError"));

    // Without registration the same error falls back to the generic
    // carrier but keeps its name.
    let (_server, other_client) = sessions_with_server_options(SessionOptions::default());
    let chaos = other_client.get_remote_service("chaos").await.unwrap().unwrap();
    let failure = chaos
        .call(
            "throwKind",
            vec![
                RpcValue::from("FrobnicationError"),
                RpcValue::from("gears jammed"),
            ],
        )
        .await
        .unwrap_err();
    let remote = remote_error(failure);
    assert!(remote.is_kind("GenericError"));
    assert_eq!(remote.name, "FrobnicationError");
}
