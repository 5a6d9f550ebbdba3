// Discovery and introspection tests, including the per-service and
// session-wide opt-outs.

use std::sync::Arc;

use anyhow::Result;
use webrpc::{
    CallResult, Exposure, MemoryChannel, MethodMetadata, Remotable, RpcValue, ServiceError,
    ServiceMetadata, Session, SessionOptions, SimpleType, WireError, SESSION_WELL_KNOWN_ID,
};
use webrpc_common::BoxFuture;

// ============================================================================
// Test Helpers
// ============================================================================

struct Echo;

impl Remotable for Echo {
    fn dispatch<'a>(&'a self, method: &'a str, mut params: Vec<RpcValue>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            match method {
                "echo" => Ok(if params.is_empty() {
                    RpcValue::null()
                } else {
                    params.remove(0)
                }),
                other => Err(ServiceError::from(WireError::generic(format!(
                    "No such method '{}'",
                    other
                )))),
            }
        })
    }

    fn exposure(&self, method: &str) -> Option<Exposure> {
        (method == "echo").then_some(Exposure::Call)
    }
}

fn echo_factory() -> Arc<dyn Remotable> {
    Arc::new(Echo)
}

fn echo_metadata(name: &str) -> ServiceMetadata {
    ServiceMetadata::builder(name)
        .description("echoes its argument")
        .method(
            MethodMetadata::new("echo")
                .description("returns the argument unchanged")
                .returns(SimpleType::Unknown)
                .parameter("value", SimpleType::Unknown),
        )
        .event("echoed", "fires after each echo")
        .build()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_non_discoverable_service_hidden() -> Result<()> {
    let (near, far) = MemoryChannel::pair();
    let server = Session::new(far);
    let client = Session::new(near);

    server.register_service(
        ServiceMetadata::builder("ghost").discoverable(false).build(),
        echo_factory,
    )?;

    // Only the session's own entry shows up.
    let services = client.discover_remote_services().await?;
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].name, SESSION_WELL_KNOWN_ID);

    // A default-tagged service becomes visible alongside it.
    server.register_service(echo_metadata("echo"), echo_factory)?;
    let services = client.discover_remote_services().await?;
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["echo", SESSION_WELL_KNOWN_ID]);

    // Hidden does not mean unreachable.
    assert!(client.get_remote_service("ghost").await?.is_some());
    // Defaults leave the visible service introspectable.
    assert!(client.introspect_remote_service("echo").await?.is_some());
    Ok(())
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_introspection_shape() -> Result<()> {
    let (near, far) = MemoryChannel::pair();
    let server = Session::new(far);
    let client = Session::new(near);
    server.register_service(echo_metadata("echo"), echo_factory)?;

    let introspection = client
        .introspect_remote_service("echo")
        .await?
        .expect("echo should be introspectable");

    assert_eq!(introspection.name, "echo");
    assert_eq!(introspection.description, "echoes its argument");
    assert_eq!(introspection.methods.len(), 1);
    let method = &introspection.methods[0];
    assert_eq!(method.name, "echo");
    assert_eq!(method.simple_return_type, SimpleType::Unknown);
    assert_eq!(method.parameters[0].name, "value");
    assert_eq!(introspection.events[0].name, "echoed");
    Ok(())
}

#[tokio::test]
async fn test_introspection_opt_out_per_service() -> Result<()> {
    let (near, far) = MemoryChannel::pair();
    let server = Session::new(far);
    let client = Session::new(near);
    server.register_service(
        ServiceMetadata::builder("shy").introspectable(false).build(),
        echo_factory,
    )?;

    // Still discoverable, just not introspectable.
    let services = client.discover_remote_services().await?;
    assert!(services.iter().any(|s| s.name == "shy"));
    assert!(client.introspect_remote_service("shy").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_introspection_disabled_session_wide() -> Result<()> {
    let (near, far) = MemoryChannel::pair();
    let server = Session::with_options(
        far,
        SessionOptions {
            introspection_enabled: false,
            ..SessionOptions::default()
        },
    );
    let client = Session::new(near);
    server.register_service(echo_metadata("echo"), echo_factory)?;

    assert!(client.discover_remote_services().await?.is_empty());
    assert!(client.introspect_remote_service("echo").await?.is_none());

    // Direct access is unaffected by the introspection switch.
    let echo = client
        .get_remote_service("echo")
        .await?
        .expect("echo should resolve");
    let value = echo.call("echo", vec![RpcValue::from("hi")]).await?;
    assert_eq!(value.as_str(), Some("hi"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_service_introspection_is_none() -> Result<()> {
    let (near, far) = MemoryChannel::pair();
    let _server = Session::new(far);
    let client = Session::new(near);
    assert!(client.introspect_remote_service("nope").await?.is_none());
    Ok(())
}
