//! `chatmux status` — configuration and provider overview.

use chatmux_adapters::ProviderId;
use colored::Colorize;
use serde::Serialize;

use super::{print_json, Context};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderStatus {
    provider: ProviderId,
    configured: bool,
    enabled: bool,
    base_url: String,
    requests_per_minute: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    version: &'static str,
    config_path: Option<String>,
    config_found: bool,
    default_model: String,
    providers: Vec<ProviderStatus>,
}

pub async fn execute(ctx: &Context, banner: &str) -> anyhow::Result<()> {
    let config = &ctx.config;
    let status = Status {
        version: env!("CARGO_PKG_VERSION"),
        config_path: ctx.config_path.as_ref().map(|p| p.display().to_string()),
        config_found: ctx.config_path.as_ref().is_some_and(|p| p.exists()),
        default_model: config.chat.model.clone(),
        providers: ProviderId::ALL
            .into_iter()
            .map(|provider| {
                let entry = config.providers.get(provider);
                ProviderStatus {
                    provider,
                    configured: config.providers.api_key(provider).is_some(),
                    enabled: entry.enabled,
                    base_url: entry
                        .base_url
                        .clone()
                        .unwrap_or_else(|| provider.default_base_url().to_string()),
                    requests_per_minute: config.rate_limits.get(provider).requests_per_minute,
                }
            })
            .collect(),
    };

    if ctx.json() {
        return print_json(&status);
    }

    println!("{banner}");
    let config_line = match (&status.config_path, status.config_found) {
        (Some(path), true) => path.clone(),
        (Some(path), false) => format!("{path} {}", "(not found, using defaults)".dimmed()),
        (None, _) => "(defaults)".dimmed().to_string(),
    };
    println!("  Config:        {config_line}");
    println!("  Default model: {}", status.default_model.bold());
    println!(
        "  Breaker:       opens after {} failures, retries after {}s",
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.recovery_timeout().as_secs()
    );
    println!();

    for p in &status.providers {
        let state = match (p.enabled, p.configured) {
            (false, _) => "⚪ disabled".to_string(),
            (true, true) => "🟢 key set".to_string(),
            (true, false) => format!("🔴 set {}", p.provider.api_key_env()),
        };
        println!(
            "  {:<16} {:<28} {:>4} rpm  {}",
            p.provider.display_name(),
            state,
            p.requests_per_minute,
            p.base_url.dimmed()
        );
    }
    println!("\n  Effective config:\n");
    for line in config.to_toml_redacted()?.lines() {
        println!("    {}", line.dimmed());
    }
    println!("\n  CLI version:   {}", status.version);
    Ok(())
}
