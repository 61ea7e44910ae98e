//! `chatmux models` — browse the model catalog.

use chatmux_adapters::ProviderId;
use chatmux_core::registry::{self, Capability, ModelStatus};
use clap::Args;
use colored::Colorize;

use super::{print_json, Context};

#[derive(Args)]
pub struct ModelsArgs {
    /// Only models served by this provider.
    #[arg(long, short)]
    pub provider: Option<ProviderId>,

    /// Only models with this capability (e.g. vision, code, long-context).
    #[arg(long, short)]
    pub capability: Option<Capability>,

    /// Include deprecated and maintenance models.
    #[arg(long)]
    pub all: bool,
}

pub async fn execute(ctx: &Context, args: ModelsArgs) -> anyhow::Result<()> {
    let configured = ctx.config.providers.configured();

    let mut models: Vec<_> = if args.all {
        registry::catalog().iter().collect()
    } else {
        registry::available_models()
    };
    if let Some(provider) = args.provider {
        models.retain(|m| m.provider == provider);
    }
    if let Some(capability) = args.capability {
        models.retain(|m| m.has(capability));
    }

    if ctx.json() {
        return print_json(&models);
    }

    println!("\n  📚 Models:\n");
    if models.is_empty() {
        println!("  (no models match)");
        return Ok(());
    }

    println!(
        "  {:<28} {:<10} {:>9}  {:<36} {}",
        "ID".bold(),
        "PROVIDER".bold(),
        "CONTEXT".bold(),
        "CAPABILITIES".bold(),
        "STATUS".bold()
    );
    println!("  {}", "─".repeat(96).dimmed());
    for m in &models {
        let capabilities: Vec<_> = m.capabilities.iter().map(|c| c.as_str()).collect();
        let status = match m.status {
            ModelStatus::Available if configured.contains(&m.provider) => "🟢 ready".to_string(),
            ModelStatus::Available => "⚪ no key".to_string(),
            ModelStatus::Maintenance => "🟡 maintenance".to_string(),
            ModelStatus::Deprecated => "🔴 deprecated".to_string(),
        };
        println!(
            "  {:<28} {:<10} {:>9}  {:<36} {}",
            m.id,
            m.provider.as_str(),
            format_tokens(m.context_window),
            capabilities.join(","),
            status
        );
    }
    println!("\n  {} {} model(s)", "→".dimmed(), models.len());
    Ok(())
}

fn format_tokens(tokens: u32) -> String {
    if tokens >= 1_000_000 {
        format!("{}M", tokens / 1_000_000)
    } else {
        format!("{}K", tokens / 1_000)
    }
}
