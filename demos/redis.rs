//! Example sharing admission windows across instances through Redis.
//!
//! Start Redis, then run the example:
//! ```bash
//! docker run -p 6379:6379 redis:7-alpine
//! RATE_LIMIT_REQUESTS=10 cargo run --example redis --features redis-storage
//! ```
//!
//! Run it from two terminals at once: both processes draw on the same
//! window, so together they serve at most `RATE_LIMIT_REQUESTS` requests
//! per caller per window.
//!
//! Stopping Redis mid-run shows the fail-open path: requests keep being
//! served and a warning is logged until the circuit breaker opens.

use investwise_serving::infrastructure::telemetry;
use investwise_serving::{GatewayBuilder, PredictionRequest, ServingConfig};
use std::collections::BTreeMap;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServingConfig::from_env()?;
    telemetry::init(config.log_format, "info")?;

    let url = config
        .redis_url
        .clone()
        .unwrap_or_else(|| "redis://127.0.0.1/".to_string());
    println!("Connecting to {url}");

    let gateway = GatewayBuilder::from_config(&config)?
        .with_redis(&url)
        .await?
        .build()?;
    gateway.warm_up().await;

    let features = BTreeMap::from([
        ("gdp_growth_rate".to_string(), 5.2),
        ("inflation_rate".to_string(), 6.8),
        ("usd_kes_rate".to_string(), 129.5),
        ("cbr_rate".to_string(), 10.5),
        ("trade_balance".to_string(), -1200.0),
    ]);

    let caller = "shared-demo-caller";
    let mut served = 0;
    let mut limited = 0;
    for i in 1..=30 {
        match gateway
            .predict(caller, PredictionRequest::new(features.clone()))
            .await
        {
            Ok(_) => served += 1,
            Err(rejection) => {
                limited += 1;
                println!("  #{i}: {rejection}");
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let status = gateway.rate_status(caller).await;
    println!("\nThis instance: {served} served, {limited} limited");
    println!(
        "Shared window: {}/{} used, {} remaining",
        status.count, status.limit, status.remaining
    );
    Ok(())
}
