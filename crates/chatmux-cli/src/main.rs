//! chatmux CLI — talk to OpenAI, Anthropic, Gemini and Mistral from the terminal.
//!
//! 🔀 `chatmux` — browse the model catalog, probe providers, and chat with
//! automatic fallback.

mod commands;

use clap::Parser;
use commands::{execute, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    execute(cli).await
}
