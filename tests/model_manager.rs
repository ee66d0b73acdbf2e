use investwise_serving::application::model_manager::ModelManager;
use investwise_serving::infrastructure::artifact::{save, FsArtifactReader};
use investwise_serving::infrastructure::mocks::{artifacts, MockCaptureLayer, MockRegistry};
use investwise_serving::domain::model::{Estimator, LoadedModel};
use investwise_serving::{
    FeatureSchema, FsModelRegistry, ModelManagerConfig, ModelRegistry, ModelStatus, Provenance,
    ServingMetrics, LATEST,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

const FEATURES: [&str; 5] = [
    "gdp_growth_rate",
    "inflation_rate",
    "usd_kes_rate",
    "cbr_rate",
    "trade_balance",
];

fn manager(
    registry: Option<Arc<dyn ModelRegistry>>,
    local_paths: Vec<String>,
    allow_synthetic: bool,
    metrics: ServingMetrics,
) -> ModelManager {
    ModelManager::new(
        ModelManagerConfig {
            local_paths,
            allow_synthetic,
            registry_timeout: Duration::from_secs(1),
            ..ModelManagerConfig::default()
        },
        FeatureSchema::economic_indicators(),
        registry,
        Arc::new(FsArtifactReader::new()),
        metrics,
    )
}

fn template(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_cold_gets_share_one_load() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_version("v1", artifacts::economic_linear("m"))
            .with_delay(Duration::from_millis(50)),
    );
    let manager = Arc::new(manager(
        Some(registry.clone()),
        Vec::new(),
        false,
        ServingMetrics::new(),
    ));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move { manager.get("v1").await.unwrap() }));
    }
    let mut resolved = Vec::new();
    for handle in handles {
        resolved.push(handle.await.unwrap());
    }

    assert_eq!(registry.resolve_calls(), 1);
    assert!(resolved.iter().all(|h| h.same_model(&resolved[0])));
}

#[tokio::test]
async fn test_unknown_version_without_local_file_gets_stub() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = ServingMetrics::new();
    let manager = manager(
        Some(Arc::new(MockRegistry::new())),
        vec![template(dir.path(), "{version}.json")],
        true,
        metrics.clone(),
    );

    let handle = manager.get("v99").await.unwrap();
    assert_eq!(handle.provenance, Provenance::SyntheticStub);
    assert_eq!(handle.version, "v99");
    assert_eq!(handle.model.n_features(), FEATURES.len());
    assert_eq!(metrics.snapshot().resolved_synthetic_stub, 1);
}

#[tokio::test]
async fn test_registry_miss_falls_back_to_local_file() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    save(
        &dir.path().join("models/v2.json"),
        &artifacts::economic_linear("m"),
    )
    .await
    .unwrap();

    let registry = Arc::new(MockRegistry::new());
    let manager = manager(
        Some(registry.clone()),
        vec![
            template(dir.path(), "models/{version}.bin"),
            template(dir.path(), "models/{version}.json"),
        ],
        false,
        ServingMetrics::new(),
    );

    let handle = manager.get("v2").await.unwrap();
    assert_eq!(handle.provenance, Provenance::LocalFile);
    assert_eq!(handle.version, "v2");
    assert_eq!(registry.resolve_calls(), 1);

    // A registry miss is expected, not a fault.
    assert!(capture
        .at_level(Level::INFO)
        .iter()
        .any(|e| e.message.contains("trying local files")));
    assert!(capture.at_level(Level::WARN).is_empty());
}

#[tokio::test]
async fn test_bincode_artifact_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    save(
        &dir.path().join("model.bin"),
        &artifacts::economic_linear("m"),
    )
    .await
    .unwrap();

    let manager = manager(
        None,
        vec![template(dir.path(), "model.bin")],
        false,
        ServingMetrics::new(),
    );
    let handle = manager.get(LATEST).await.unwrap();
    assert_eq!(handle.provenance, Provenance::LocalFile);
}

#[tokio::test]
async fn test_filesystem_registry_listing() {
    let dir = tempfile::tempdir().unwrap();
    let name = ModelManagerConfig::default().model_name;
    for version in ["v1", "v2"] {
        save(
            &dir.path().join(&name).join(version).join("artifact.json"),
            &artifacts::economic_linear("m"),
        )
        .await
        .unwrap();
    }

    let registry: Arc<dyn ModelRegistry> = Arc::new(FsModelRegistry::new(dir.path()));
    let manager = manager(Some(registry), Vec::new(), false, ServingMetrics::new());

    let latest = manager.get(LATEST).await.unwrap();
    assert_eq!(latest.version, "v2");
    assert_eq!(latest.provenance, Provenance::Registry);

    let listed = manager.list().await;
    let versions: Vec<(&str, ModelStatus)> = listed
        .iter()
        .map(|info| (info.version.as_str(), info.status))
        .collect();
    assert_eq!(
        versions,
        vec![(LATEST, ModelStatus::Loaded), ("v1", ModelStatus::Available)]
    );
    assert_eq!(listed[0].resolved_version.as_deref(), Some("v2"));
    assert_eq!(listed[1].metrics.get("r2"), Some(&0.82));
}

#[tokio::test]
async fn test_registry_artifact_with_reordered_features_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    save(
        &dir.path().join("v1.json"),
        &artifacts::economic_linear("m"),
    )
    .await
    .unwrap();

    let mut reversed = FEATURES;
    reversed.reverse();
    let registry = Arc::new(MockRegistry::new().with_version(
        "v1",
        artifacts::linear("m", &reversed, &[1.0, 0.0, 0.0, 0.0, 0.0], 0.0),
    ));
    let manager = manager(
        Some(registry),
        vec![template(dir.path(), "{version}.json")],
        false,
        ServingMetrics::new(),
    );

    let handle = manager.get("v1").await.unwrap();
    assert_eq!(handle.provenance, Provenance::LocalFile);
    assert_eq!(handle.model.artifact().feature_names, FEATURES);
}

#[tokio::test]
async fn test_corrupt_tree_artifact_is_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let mut artifact = artifacts::trees("m", &FEATURES);
    if let Estimator::TreeEnsemble(ensemble) = &mut artifact.estimator {
        ensemble.trees[1].output = usize::MAX;
    }
    save(&dir.path().join("v1.json"), &artifact).await.unwrap();

    let manager = manager(
        None,
        vec![template(dir.path(), "{version}.json")],
        true,
        ServingMetrics::new(),
    );
    let handle = manager.get("v1").await.unwrap();
    assert_eq!(handle.provenance, Provenance::SyntheticStub);
    assert!(LoadedModel::new(artifact).is_err());
}

#[tokio::test]
async fn test_version_token_cannot_escape_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    save(
        &dir.path().join("private/secret.json"),
        &artifacts::economic_linear("m"),
    )
    .await
    .unwrap();

    let metrics = ServingMetrics::new();
    let manager = manager(
        None,
        vec![template(dir.path(), "models/{version}.json")],
        true,
        metrics.clone(),
    );

    assert!(manager.get("../private/secret").await.is_err());
    assert!(!manager.load("../private/secret").await);
    assert!(!manager.is_model_loaded());
    assert_eq!(metrics.snapshot().resolved_local_file, 0);
    assert_eq!(metrics.snapshot().resolved_synthetic_stub, 0);
}

#[tokio::test]
async fn test_unknown_versions_share_one_stub_model() {
    let metrics = ServingMetrics::new();
    let manager = manager(None, Vec::new(), true, metrics.clone());

    let a = manager.get("junk-a").await.unwrap();
    let b = manager.get("junk-b").await.unwrap();
    assert_eq!(a.provenance, Provenance::SyntheticStub);
    assert_eq!(b.version, "junk-b");
    assert!(a.same_model(&b));
    assert_eq!(metrics.snapshot().resolved_synthetic_stub, 2);
}
