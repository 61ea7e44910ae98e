//! `chatmux chat` — send one message and print the reply.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chatmux_core::{ChatEvent, ChatOrchestrator, MessageStatus, ResilienceContext};
use clap::Args;
use colored::Colorize;

use super::{print_json, Context};

#[derive(Args)]
pub struct ChatArgs {
    /// Message text.
    pub message: String,

    /// Model id (see `chatmux models`).
    #[arg(long, short)]
    pub model: Option<String>,

    /// Wait for the whole reply instead of streaming it.
    #[arg(long)]
    pub no_stream: bool,

    /// System prompt.
    #[arg(long, short)]
    pub system: Option<String>,

    /// Fail instead of trying the model's fallback chain.
    #[arg(long)]
    pub no_fallback: bool,
}

pub async fn execute(mut ctx: Context, args: ChatArgs) -> anyhow::Result<()> {
    let settings = &mut ctx.config.chat;
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(system) = args.system {
        settings.system_prompt = Some(system);
    }
    settings.streaming &= !args.no_stream;
    settings.fallback &= !args.no_fallback;

    let resilience = Arc::new(ResilienceContext::new());
    let sweeper = resilience.spawn_cleanup(Duration::from_secs(60), ctx.config.rate_limits.bucket_max_age());
    let chat = Arc::new(ChatOrchestrator::from_config(&ctx.config, resilience));

    let stopper = {
        let chat = chat.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                chat.stop_generation();
            }
        })
    };

    let json = ctx.json();
    let result = chat
        .send_message(args.message, vec![], |event| {
            if !json {
                render(event);
            }
        })
        .await;
    stopper.abort();
    sweeper.abort();

    let reply = result?;
    if json {
        return print_json(&reply);
    }

    println!();
    let model = reply.model.as_deref().unwrap_or("-");
    let tokens = reply
        .tokens
        .map_or_else(String::new, |t| format!(" · {} in / {} out", t.input, t.output));
    match reply.status {
        MessageStatus::Stopped => eprintln!("\n  {} stopped ({model})", "■".yellow()),
        _ => eprintln!("\n  {} {model}{tokens}", "→".dimmed()),
    }
    Ok(())
}

fn render(event: ChatEvent) {
    match event {
        ChatEvent::Started { model, provider } => {
            eprintln!("  {} {} via {}\n", "💬".to_string(), model.bold(), provider.display_name());
        }
        ChatEvent::Delta(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        ChatEvent::FallingBack { from, to, reason } => {
            eprintln!(
                "\n  {} {from} failed ({}), trying {}\n",
                "⚠".yellow().bold(),
                reason.dimmed(),
                to.bold()
            );
        }
        ChatEvent::Completed { .. } => {}
    }
}
