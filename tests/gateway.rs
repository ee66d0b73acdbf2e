use investwise_serving::infrastructure::mocks::{
    artifacts, FailingInference, MockCaptureLayer, MockClock, MockRegistry, RecordingSink,
    StallingInference,
};
use investwise_serving::{
    GatewayBuilder, HealthStatus, ModelManagerConfig, PredictionGateway, PredictionRequest,
    Provenance, Rejection, RejectionKind, WindowPolicy, LATEST,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

fn features() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("gdp_growth_rate".to_string(), 5.2),
        ("inflation_rate".to_string(), 6.8),
        ("usd_kes_rate".to_string(), 129.5),
        ("cbr_rate".to_string(), 10.5),
        ("trade_balance".to_string(), -1200.0),
    ])
}

fn registry_only() -> ModelManagerConfig {
    ModelManagerConfig {
        local_paths: Vec::new(),
        allow_synthetic: false,
        ..ModelManagerConfig::default()
    }
}

fn builder(limit: u64) -> GatewayBuilder {
    GatewayBuilder::new()
        .with_rate_limit(WindowPolicy::per_seconds(limit, 60).unwrap())
        .with_clock(Arc::new(MockClock::new()))
        .with_registry(Arc::new(
            MockRegistry::new().with_version("v1", artifacts::economic_linear("m")),
        ))
        .with_model_config(registry_only())
}

async fn wait_until(capture: &MockCaptureLayer, needle: &str) -> bool {
    for _ in 0..100 {
        if capture.contains(needle) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_served_prediction_is_logged_and_recorded() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let sink = Arc::new(RecordingSink::new());
    let gateway = builder(10).with_sink(sink.clone()).build().unwrap();

    let outcome = gateway
        .predict(
            "203.0.113.7",
            PredictionRequest::new(features()).with_explanation(true),
        )
        .await
        .unwrap();
    assert_eq!(outcome.caller, "203.0.113.7");
    assert_eq!(outcome.model_version, "v1");
    assert!(outcome.explanation.is_some());

    let served = capture.at_level(Level::INFO);
    let event = served
        .iter()
        .find(|e| e.message == "prediction served")
        .expect("served event");
    assert_eq!(event.field("caller"), Some("203.0.113.7"));
    assert_eq!(event.field("provenance"), Some("registry"));

    assert!(sink.wait_for(1, Duration::from_secs(1)).await);
    assert_eq!(sink.outcomes()[0].prediction, outcome.prediction);
}

#[tokio::test]
async fn test_limit_then_reset() {
    let gateway = builder(3).build().unwrap();

    for _ in 0..3 {
        gateway
            .predict("ip1", PredictionRequest::new(features()))
            .await
            .unwrap();
    }
    let rejection = gateway
        .predict("ip1", PredictionRequest::new(features()))
        .await
        .unwrap_err();
    assert_eq!(rejection.http_status(), 429);
    assert_eq!(
        rejection.to_string(),
        "rate limit exceeded: 3 requests per 60s, 0 remaining"
    );

    // Other callers are unaffected.
    assert!(gateway
        .predict("ip2", PredictionRequest::new(features()))
        .await
        .is_ok());

    assert!(gateway.reset_rate_limit("ip1").await);
    assert_eq!(gateway.rate_status("ip1").await.remaining, 3);
    assert!(gateway
        .predict("ip1", PredictionRequest::new(features()))
        .await
        .is_ok());

    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.denied, 1);
    assert_eq!(gateway.metrics().rejections(RejectionKind::RateLimited), 1);
}

#[tokio::test]
async fn test_malformed_requests_never_consume_quota() {
    let gateway = builder(2).build().unwrap();

    let mut partial = features();
    partial.remove("trade_balance");
    let mut not_finite = features();
    not_finite.insert("cbr_rate".to_string(), f64::NAN);

    for bad in [BTreeMap::new(), partial, not_finite] {
        let rejection = gateway
            .predict("ip1", PredictionRequest::new(bad))
            .await
            .unwrap_err();
        assert!(matches!(rejection, Rejection::Validation(_)), "{rejection}");
    }
    assert_eq!(gateway.rate_status("ip1").await.count, 0);
}

#[tokio::test]
async fn test_backend_failures_map_to_server_errors() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let stalled = builder(10)
        .with_inference(Arc::new(StallingInference::new(Duration::from_millis(300))))
        .with_inference_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let rejection = stalled
        .predict("ip1", PredictionRequest::new(features()))
        .await
        .unwrap_err();
    assert_eq!(rejection.http_status(), 504);

    let failing = builder(10)
        .with_inference(Arc::new(FailingInference))
        .build()
        .unwrap();
    let rejection = failing
        .predict("ip1", PredictionRequest::new(features()))
        .await
        .unwrap_err();
    assert_eq!(rejection.http_status(), 503);
    assert!(rejection.to_string().contains("model runtime crashed"));

    let errors = capture.at_level(Level::ERROR);
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.message == "prediction rejected"));
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_request() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let sink = Arc::new(RecordingSink::failing());
    let gateway = builder(10).with_sink(sink.clone()).build().unwrap();

    assert!(gateway
        .predict("ip1", PredictionRequest::new(features()))
        .await
        .is_ok());
    assert!(sink.wait_for(1, Duration::from_secs(1)).await);
    assert!(wait_until(&capture, "failed to record prediction").await);
}

#[tokio::test]
async fn test_unknown_version_is_not_found() {
    let gateway = builder(10).build().unwrap();
    let rejection = gateway
        .predict("ip1", PredictionRequest::new(features()).with_version("v7"))
        .await
        .unwrap_err();
    assert_eq!(rejection.http_status(), 404);
    assert_eq!(rejection.to_string(), "model version 'v7' is unavailable");
}

#[tokio::test]
async fn test_reordered_registry_artifact_is_not_served() {
    let feature_map = features();
    let mut reversed: Vec<&str> = feature_map.keys().map(String::as_str).collect();
    reversed.sort_unstable_by(|a, b| b.cmp(a));
    let gateway = GatewayBuilder::new()
        .with_clock(Arc::new(MockClock::new()))
        .with_registry(Arc::new(MockRegistry::new().with_version(
            "v1",
            artifacts::linear("m", &reversed, &[1.0, 0.0, 0.0, 0.0, 0.0], 0.0),
        )))
        .with_model_config(registry_only())
        .build()
        .unwrap();

    let rejection = gateway
        .predict("ip1", PredictionRequest::new(features()).with_version("v1"))
        .await
        .unwrap_err();
    assert_eq!(rejection.http_status(), 404);
}

#[tokio::test]
async fn test_unknown_versions_reuse_the_stub_explainer() {
    let gateway = GatewayBuilder::new()
        .with_clock(Arc::new(MockClock::new()))
        .with_model_config(ModelManagerConfig {
            local_paths: Vec::new(),
            ..ModelManagerConfig::default()
        })
        .build()
        .unwrap();

    let mut outcomes = Vec::new();
    for version in ["junk-a", "junk-b"] {
        let request = PredictionRequest::new(features())
            .with_version(version)
            .with_explanation(true);
        outcomes.push(gateway.predict("ip1", request).await.unwrap());
    }
    assert!(outcomes.iter().all(|o| o.provenance == Provenance::SyntheticStub));
    assert_eq!(outcomes[0].prediction, outcomes[1].prediction);
    assert_eq!(outcomes[0].explanation, outcomes[1].explanation);
    assert!(outcomes[0].explanation.is_some());
}

#[tokio::test]
async fn test_health_reports_degraded_stub() {
    let gateway: PredictionGateway = GatewayBuilder::new()
        .with_model_config(ModelManagerConfig {
            local_paths: Vec::new(),
            ..ModelManagerConfig::default()
        })
        .build()
        .unwrap();
    assert_eq!(gateway.health().status, HealthStatus::NoModel);

    assert!(gateway.warm_up().await);
    let health = gateway.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.provenance, Some(Provenance::SyntheticStub));
    assert_eq!(health.current_version.as_deref(), Some(LATEST));

    let outcome = gateway
        .predict("ip1", PredictionRequest::new(features()))
        .await
        .unwrap();
    assert_eq!(outcome.provenance, Provenance::SyntheticStub);
    assert!(outcome.prediction.is_finite());
}

#[tokio::test]
async fn test_model_lifecycle() {
    let gateway = builder(10).build().unwrap();
    assert!(gateway.warm_up().await);
    assert_eq!(gateway.health().status, HealthStatus::Healthy);

    let listed = gateway.list_models().await;
    assert!(listed.iter().any(|info| info.version == LATEST));

    assert!(gateway.load_model("v1").await);
    assert!(!gateway.load_model("v9").await);
    assert!(gateway.unload_model("v1"));
    assert!(!gateway.unload_model("v1"));

    let rows: Vec<Vec<f64>> = (0..20)
        .map(|i| vec![i as f64 * 0.1, 6.0, 130.0, 10.0, -1000.0 - i as f64 * 50.0])
        .collect();
    let importance = gateway.global_importance("v1", &rows, 10).await.unwrap();
    assert_eq!(importance.samples_analyzed, 10);
    assert_eq!(importance.most_important.as_deref(), Some("trade_balance"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_callers_share_quota() {
    let gateway = Arc::new(builder(5).build().unwrap());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            gateway
                .predict("shared", PredictionRequest::new(features()))
                .await
        }));
    }
    let mut served = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => served += 1,
            Err(Rejection::RateLimited { .. }) => limited += 1,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }
    assert_eq!((served, limited), (5, 15));
}
