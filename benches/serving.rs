use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use investwise_serving::application::circuit_breaker::CircuitBreaker;
use investwise_serving::application::limiter::SlidingWindowLimiter;
use investwise_serving::domain::model::LoadedModel;
use investwise_serving::infrastructure::mocks::{artifacts, MockRegistry};
use investwise_serving::{
    CircuitBreakerConfig, Clock, Explainer, ExplainerStrategy, FeatureSchema, GatewayBuilder,
    KernelConfig, MemoryWindowStore, ModelManagerConfig, PredictionRequest, ServingMetrics,
    SystemClock, WindowPolicy,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn limiter() -> SlidingWindowLimiter {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let breaker = Arc::new(CircuitBreaker::new(
        CircuitBreakerConfig::default(),
        Arc::clone(&clock),
    ));
    SlidingWindowLimiter::new(
        Arc::new(MemoryWindowStore::new()),
        clock,
        ServingMetrics::new(),
        breaker,
    )
}

/// Benchmark admission against the in-memory store
fn bench_admission(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1000));

    for callers in [1usize, 100] {
        group.bench_with_input(
            BenchmarkId::new("admit_1000", callers),
            &callers,
            |b, &callers| {
                let limiter = limiter();
                let policy = WindowPolicy::per_seconds(u64::MAX / 2, 1).unwrap();
                let identifiers: Vec<String> = (0..callers).map(|i| format!("10.0.0.{i}")).collect();

                b.iter(|| {
                    rt.block_on(async {
                        for i in 0..1000 {
                            let id = &identifiers[i % callers];
                            black_box(limiter.admit(black_box(id), &policy).await);
                        }
                    })
                })
            },
        );
    }

    group.bench_function("status", |b| {
        let limiter = limiter();
        let policy = WindowPolicy::per_seconds(100, 60).unwrap();
        rt.block_on(async {
            for _ in 0..50 {
                limiter.admit("10.0.0.1", &policy).await;
            }
        });
        b.iter(|| rt.block_on(limiter.status(black_box("10.0.0.1"), &policy)))
    });

    group.finish();
}

/// Benchmark attribution for each explainer strategy
fn bench_attribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribution");
    let features = ["a", "b", "c", "d", "e"];
    let x = [1.5, 6.0, 0.3, -2.0, 4.0];

    let cases = [
        (ExplainerStrategy::StructureAware, artifacts::trees("m", &features)),
        (
            ExplainerStrategy::Linear,
            artifacts::linear("m", &features, &[0.4, -0.3, 0.1, 0.2, -0.05], 1.0),
        ),
        (ExplainerStrategy::BlackBoxSampling, artifacts::neighbors("m", &features)),
    ];

    for (strategy, artifact) in cases {
        let model = Arc::new(LoadedModel::new(artifact).unwrap());
        let background = model.reference_rows(50);
        let explainer =
            Explainer::build(strategy, model, background, &KernelConfig::default()).unwrap();

        group.bench_function(BenchmarkId::new("shap_values", strategy.as_str()), |b| {
            b.iter(|| explainer.shap_values(black_box(&x)).unwrap())
        });
    }

    group.finish();
}

/// Benchmark the full request path with a warm model
fn bench_predict(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("predict");

    let gateway = GatewayBuilder::new()
        .with_rate_limit(WindowPolicy::per_seconds(u64::MAX / 2, 1).unwrap())
        .with_schema(FeatureSchema::economic_indicators())
        .with_registry(Arc::new(
            MockRegistry::new().with_version("v1", artifacts::economic_linear("m")),
        ))
        .with_model_config(ModelManagerConfig {
            local_paths: Vec::new(),
            allow_synthetic: false,
            ..ModelManagerConfig::default()
        })
        .build()
        .unwrap();
    rt.block_on(gateway.warm_up());

    let features = BTreeMap::from([
        ("gdp_growth_rate".to_string(), 5.2),
        ("inflation_rate".to_string(), 6.8),
        ("usd_kes_rate".to_string(), 129.5),
        ("cbr_rate".to_string(), 10.5),
        ("trade_balance".to_string(), -1200.0),
    ]);

    for explain in [false, true] {
        group.bench_with_input(
            BenchmarkId::new("predict", if explain { "explained" } else { "plain" }),
            &explain,
            |b, &explain| {
                b.iter(|| {
                    let request = PredictionRequest::new(features.clone()).with_explanation(explain);
                    rt.block_on(gateway.predict("10.0.0.1", request)).unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_admission, bench_attribution, bench_predict);
criterion_main!(benches);
