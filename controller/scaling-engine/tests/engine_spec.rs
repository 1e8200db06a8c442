//! Engine lifecycle against HTTP stubs.
//!
//! Tests cover:
//! - Credentials resolved from cluster secrets reach the metrics-api scaler
//! - Lifecycle events are POSTed to the configured source in order
//! - Invalid objects are rejected with a failed event
//! - Namespace-scoped sources only see their own namespace

use auth_resolver::auth::SecretTargetRef;
use auth_resolver::{
    AuthConfig, InMemorySecretStore, ProviderEndpoints, Resolver, ResolverDeps,
};
use scaling_engine::events::{CloudEventSourceSpec, EventSubscription};
use scaling_engine::events::source::{Destination, HttpDestination};
use scaling_engine::{
    scalers, EngineSettings, HttpEventSink, ObjectKey, ObjectSnapshot, Phase, ScalableObjectSpec,
    ScalerRegistry, ScalingEngine, SpecError, TriggerEvaluator, TriggerSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(store: Arc<InMemorySecretStore>) -> ScalingEngine {
    let http = reqwest::Client::new();
    let resolver = Resolver::with_defaults(ResolverDeps {
        store,
        http: http.clone(),
        endpoints: ProviderEndpoints::default(),
        token_refresh_margin: Duration::from_secs(300),
    });
    let mut registry = ScalerRegistry::new();
    scalers::register_defaults(&mut registry, http);
    let evaluator = Arc::new(TriggerEvaluator::new(Arc::new(resolver), registry));
    let sink = Arc::new(HttpEventSink::new(Duration::from_secs(5)).unwrap());
    ScalingEngine::new(
        EngineSettings {
            cluster_name: "edge-1".to_string(),
            ..EngineSettings::default()
        },
        evaluator,
        sink,
    )
}

fn event_source(name: &str, namespace: Option<&str>, uri: String) -> CloudEventSourceSpec {
    CloudEventSourceSpec {
        name: name.to_string(),
        namespace: namespace.map(str::to_string),
        destination: Destination {
            http: HttpDestination { uri },
        },
        event_subscription: EventSubscription::default(),
    }
}

fn queue_trigger(server: &MockServer) -> TriggerSpec {
    TriggerSpec::new("queue", "metrics-api")
        .with_metadata("url", format!("{}/queue", server.uri()))
        .with_metadata("valueLocation", "depth")
        .with_metadata("authMode", "bearer")
        .with_activation_threshold(5.0)
        .with_authentication("api-creds")
}

async fn first_cycle(rx: &mut watch::Receiver<ObjectSnapshot>) -> ObjectSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.cycles >= 1 {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("poller should still be running");
        }
    })
    .await
    .expect("first cycle should complete")
}

async fn posted_events(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/events")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_object_lifecycle_with_resolved_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "depth": 42 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let store = Arc::new(InMemorySecretStore::new());
    store.insert("apps", "api", [("token", "s3cret")]);
    let engine = engine(store);

    engine.apply_authentication(
        "apps",
        "api-creds",
        AuthConfig {
            secret_target_ref: vec![SecretTargetRef {
                parameter: "token".to_string(),
                name: "api".to_string(),
                key: "token".to_string(),
            }],
            ..Default::default()
        },
    );
    engine
        .apply_event_source(&event_source("audit", None, format!("{}/events", server.uri())))
        .unwrap();

    let key = engine
        .apply(ScalableObjectSpec::new("apps", "worker").with_trigger(queue_trigger(&server)))
        .unwrap();
    let mut rx = engine.watch(&key).unwrap();

    let snapshot = first_cycle(&mut rx).await;
    assert_eq!(snapshot.phase, Phase::Active);
    assert_eq!(snapshot.value, Some(42.0));
    assert_eq!(engine.snapshot(&key), Some(snapshot));

    assert!(engine.remove(&key));
    assert!(!engine.remove(&key));
    assert_eq!(engine.snapshot(&key), None);

    engine.shutdown().await;

    let events = posted_events(&server).await;
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        vec![
            "keda.scaledobject.ready.v1",
            "keda.scaledobject.trigger.active.v1",
            "keda.scaledobject.removed.v1",
        ]
    );
    assert_eq!(events[0]["source"], "/edge-1/keda/keda");
    assert_eq!(events[2]["data"]["message"], "ScaledObject was deleted");
    assert_eq!(events[2]["data"]["reason"], "ScaledObjectDeleted");
}

#[tokio::test]
async fn test_missing_secret_fails_trigger_not_engine() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "depth": 1 })))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(Arc::new(InMemorySecretStore::new()));
    engine.apply_authentication(
        "apps",
        "api-creds",
        AuthConfig {
            secret_target_ref: vec![SecretTargetRef {
                parameter: "token".to_string(),
                name: "api".to_string(),
                key: "token".to_string(),
            }],
            ..Default::default()
        },
    );

    let key = engine
        .apply(ScalableObjectSpec::new("apps", "worker").with_trigger(queue_trigger(&server)))
        .unwrap();
    let mut rx = engine.watch(&key).unwrap();

    let snapshot = first_cycle(&mut rx).await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.value, None);
    let status = serde_json::to_value(&snapshot.triggers["queue"]).unwrap();
    assert_eq!(status["outcome"]["kind"], "resolution");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_invalid_object_is_rejected_with_failed_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let engine = engine(Arc::new(InMemorySecretStore::new()));
    engine
        .apply_event_source(&event_source("audit", Some("apps"), format!("{}/events", server.uri())))
        .unwrap();

    let err = engine
        .apply(ScalableObjectSpec::new("apps", "broken"))
        .unwrap_err();
    assert!(matches!(err, SpecError::Invalid { .. }));
    assert!(engine.objects().is_empty());

    engine.shutdown().await;

    let events = posted_events(&server).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "keda.scaledobject.failed.v1");
    assert_eq!(events[0]["data"]["reason"], "ScaledObjectCheckFailed");
    assert_eq!(events[0]["subject"], "/edge-1/apps/scaledobject/broken");
}

#[tokio::test]
async fn test_namespace_scoped_source_only_sees_its_namespace() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "depth": 0 })))
        .mount(&server)
        .await;

    let engine = engine(Arc::new(InMemorySecretStore::new()));
    engine
        .apply_event_source(&event_source("apps-audit", Some("apps"), format!("{}/events", server.uri())))
        .unwrap();

    let unauthenticated = |server: &MockServer| {
        TriggerSpec::new("queue", "metrics-api")
            .with_metadata("url", format!("{}/queue", server.uri()))
            .with_metadata("valueLocation", "depth")
    };
    engine
        .apply(ScalableObjectSpec::new("apps", "worker").with_trigger(unauthenticated(&server)))
        .unwrap();
    let billing = engine
        .apply(ScalableObjectSpec::new("billing", "worker").with_trigger(unauthenticated(&server)))
        .unwrap();
    assert!(engine.remove(&billing));
    assert!(engine.remove(&ObjectKey::new("apps", "worker")));

    engine.shutdown().await;

    let events = posted_events(&server).await;
    assert!(!events.is_empty());
    for event in &events {
        assert!(
            event["subject"].as_str().unwrap().starts_with("/edge-1/apps/"),
            "unexpected event {}",
            event
        );
    }
}

#[tokio::test]
async fn test_reapplying_identical_object_keeps_poller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/queue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "depth": 3 })))
        .mount(&server)
        .await;

    let engine = engine(Arc::new(InMemorySecretStore::new()));
    let spec = ScalableObjectSpec::new("apps", "worker").with_trigger(
        TriggerSpec::new("queue", "metrics-api")
            .with_metadata("url", format!("{}/queue", server.uri()))
            .with_metadata("valueLocation", "depth"),
    );
    let key = engine.apply(spec.clone()).unwrap();
    let mut rx = engine.watch(&key).unwrap();
    first_cycle(&mut rx).await;

    engine.apply(spec).unwrap();
    let snapshot = engine.snapshot(&key).unwrap();
    assert_eq!(snapshot.cycles, 1, "state survives an identical re-apply");

    engine.shutdown().await;
}
