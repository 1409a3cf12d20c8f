//! Dashboard Demo - fetching live data through the Skywatch client
//!
//! Pulls recent earthquakes, the planetary K-index and the ISS orbit through
//! one client, then shows cache hits and the per-provider health table.
//!
//! Run with: cargo run --example dashboard_demo
//! Set RUST_LOG=skywatch_core=debug to watch admission and retries.

use anyhow::{Context, Result};
use skywatch_core::{BatchRequest, RequestOptions, SkywatchClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("\n🔭 Skywatch Dashboard Demo v{}\n", skywatch_core::version());

    let client = SkywatchClient::with_builtin_providers().context("building client")?;

    // Example 1: a single request, then the same request again from cache
    println!("📝 Example 1: Cached earthquake feed");
    println!("────────────────────────────────────");
    let params = [("format", "geojson"), ("minmagnitude", "4.5"), ("limit", "5")];
    let quakes = client
        .request("usgs", "earthquakes", params, RequestOptions::new())
        .await
        .context("fetching earthquakes")?;
    println!("  First fetch: {} bytes (HTTP {})", quakes.body.len(), quakes.status);

    let again = client
        .request("usgs", "earthquakes", params, RequestOptions::new())
        .await?;
    println!("  Second fetch: {} bytes, served from cache", again.body.len());
    println!();

    // Example 2: several providers at once; failures stay per entry
    println!("📝 Example 2: Batch across providers");
    println!("────────────────────────────────────");
    let batch = vec![
        BatchRequest::new("swpc", "kp_index"),
        BatchRequest::new("celestrak", "iss"),
        BatchRequest::new("jpl", "close_approach").param("dist-max", "0.05"),
    ];
    let labels: Vec<String> = batch
        .iter()
        .map(|b| format!("{}/{}", b.provider, b.operation))
        .collect();
    for (label, result) in labels.iter().zip(client.request_batch(batch).await) {
        match result {
            Ok(payload) => println!("  ✅ {:<26} {} bytes", label, payload.body.len()),
            Err(e) => println!("  ❌ {:<26} {} ({:?})", label, e, e.kind()),
        }
    }
    println!();

    // Example 3: provider health and remaining budgets
    println!("📝 Example 3: Provider status");
    println!("─────────────────────────────");
    for status in client.provider_status() {
        println!(
            "  {:<10} circuit={:?} failures={} budget(h/d)={:?}/{:?}",
            status.provider,
            status.circuit,
            status.consecutive_failures,
            status.budget.hourly,
            status.budget.daily
        );
    }

    let stats = client.stats();
    println!(
        "\n📊 {} requests, {} network calls, {} cache hits\n",
        stats.total_requests, stats.network_calls, stats.cache.hit_count
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
