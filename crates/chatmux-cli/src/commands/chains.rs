//! `chatmux chains` — fallback chains per use case.

use chatmux_core::registry;
use colored::Colorize;

use super::{print_json, Context};

pub async fn execute(ctx: &Context) -> anyhow::Result<()> {
    let chains = registry::fallback_chains();
    if ctx.json() {
        return print_json(&chains);
    }

    let configured = ctx.config.providers.configured();
    let arrow = format!(" {} ", "→".dimmed());
    println!("\n  🔗 Fallback chains:\n");
    for chain in chains {
        let steps: Vec<String> = chain
            .models()
            .map(|id| match registry::get_model(id) {
                Some(m) if m.is_available() && configured.contains(&m.provider) => id.green().to_string(),
                Some(m) if m.is_available() => id.to_string(),
                _ => id.dimmed().strikethrough().to_string(),
            })
            .collect();
        println!("  {:<14} {}", chain.use_case.bold(), steps.join(arrow.as_str()));
    }

    let resolved = registry::resolve_chain("general", |m| configured.contains(&m.provider));
    match resolved {
        Some(m) => println!("\n  {} general requests go to {}", "→".dimmed(), m.id.bold()),
        None => println!(
            "\n  {} No provider configured — set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY or MISTRAL_API_KEY",
            "⚠".yellow().bold()
        ),
    }
    Ok(())
}
