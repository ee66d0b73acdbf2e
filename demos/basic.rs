//! Basic example serving predictions from the synthetic fallback model.
//!
//! Reads the same environment variables as the service (see
//! `investwise_serving::infrastructure::config`), then shows explanations,
//! validation and the per-caller rate limit.
//!
//! ```bash
//! RATE_LIMIT_REQUESTS=3 cargo run --example basic
//! ```

use investwise_serving::infrastructure::telemetry;
use investwise_serving::{GatewayBuilder, PredictionRequest, ServingConfig};
use std::collections::BTreeMap;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServingConfig::from_env()?;
    telemetry::init(config.log_format, "info")?;

    let gateway = GatewayBuilder::from_config(&config)?.build()?;
    gateway.warm_up().await;

    println!("=== InvestWise Serving Example ===\n");
    println!("Health: {}\n", serde_json::to_string_pretty(&gateway.health())?);

    let features = BTreeMap::from([
        ("gdp_growth_rate".to_string(), 5.2),
        ("inflation_rate".to_string(), 6.8),
        ("usd_kes_rate".to_string(), 129.5),
        ("cbr_rate".to_string(), 10.5),
        ("trade_balance".to_string(), -1200.0),
    ]);

    println!("Explained prediction:");
    let outcome = gateway
        .predict(
            "203.0.113.7",
            PredictionRequest::new(features.clone()).with_explanation(true),
        )
        .await?;
    println!(
        "  {:.4} from {} ({})",
        outcome.prediction, outcome.model_version, outcome.provenance
    );
    if let Some(explanation) = &outcome.explanation {
        println!("  {}", explanation.summary);
        for c in &explanation.contributions {
            println!("    {:<18} {:>+10.4}", c.feature, c.contribution);
        }
    }

    println!("\nMissing feature:");
    let mut partial = features.clone();
    partial.remove("cbr_rate");
    if let Err(rejection) = gateway.predict("203.0.113.7", PredictionRequest::new(partial)).await {
        println!("  {} {}", rejection.http_status(), rejection);
    }

    println!("\nBurst from one caller:");
    let limit = gateway.config().rate_limit.limit();
    for i in 1..=limit + 2 {
        match gateway
            .predict("198.51.100.1", PredictionRequest::new(features.clone()))
            .await
        {
            Ok(outcome) => println!("  #{i}: {:.4}", outcome.prediction),
            Err(rejection) => println!("  #{i}: {} {}", rejection.http_status(), rejection),
        }
    }

    let status = gateway.rate_status("198.51.100.1").await;
    println!("\nQuota: {}/{} used, {} remaining", status.count, status.limit, status.remaining);
    println!("\nMetrics: {:?}", gateway.metrics().snapshot());
    println!("\n=== Example Complete ===");
    Ok(())
}
