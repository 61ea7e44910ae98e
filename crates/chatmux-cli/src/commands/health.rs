//! `chatmux health` — probe provider reachability.

use std::sync::Arc;

use chatmux_adapters::{HealthStatus, ProviderHealth, ProviderId};
use chatmux_core::{HealthMonitor, ModelRegistry};
use clap::Args;
use colored::Colorize;

use super::{print_json, Context};

#[derive(Args)]
pub struct HealthArgs {
    /// Probe a single provider.
    pub provider: Option<ProviderId>,
}

pub async fn execute(ctx: &Context, args: HealthArgs) -> anyhow::Result<()> {
    let registry = Arc::new(ModelRegistry::from_config(&ctx.config));
    let monitor = HealthMonitor::from_config(registry, &ctx.config.health);

    let report = match args.provider {
        Some(provider) => vec![monitor.provider_health(provider).await],
        None => monitor.all_provider_health().await,
    };

    if ctx.json() {
        return print_json(&report);
    }

    println!("\n  🩺 Provider health:\n");
    println!(
        "  {:<16} {:<14} {:>9}  {:<10} {}",
        "PROVIDER".bold(),
        "STATUS".bold(),
        "LATENCY".bold(),
        "QUOTA".bold(),
        "DETAIL".bold()
    );
    println!("  {}", "─".repeat(72).dimmed());
    for health in &report {
        print_row(health);
    }

    let usable = report.iter().filter(|h| h.is_usable()).count();
    println!("\n  {} {usable}/{} provider(s) usable", "→".dimmed(), report.len());
    Ok(())
}

fn print_row(health: &ProviderHealth) {
    let latency = health
        .latency_ms
        .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"));
    let quota = health
        .rate_limit
        .as_ref()
        .and_then(|r| r.remaining.zip(r.limit))
        .map_or_else(|| "-".to_string(), |(remaining, limit)| format!("{remaining}/{limit}"));
    let detail = health.error.as_deref().unwrap_or("");
    let detail = match health.status {
        HealthStatus::Unhealthy => detail.red().to_string(),
        _ => detail.dimmed().to_string(),
    };
    println!(
        "  {:<16} {:<14} {:>9}  {:<10} {}",
        health.provider.display_name(),
        health.status.to_string(),
        latency,
        quota,
        detail
    );
}
