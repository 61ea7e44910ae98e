//! CLI command definitions and dispatch.

pub mod chains;
pub mod chat;
pub mod health;
pub mod models;
pub mod status;

use std::path::PathBuf;

use anyhow::Context as _;
use chatmux_core::config::CONFIG_PATH_ENV;
use chatmux_core::telemetry;
use chatmux_core::ChatmuxConfig;
use clap::{Parser, Subcommand};

const BANNER: &str = r#"
   🔀 chatmux
   One chat interface, four providers.
"#;

/// chatmux CLI — multi-provider chat with rate limiting and fallback.
#[derive(Parser)]
#[command(
    name = "chatmux",
    version,
    about = "🔀 chatmux — One chat interface, four providers",
    long_about = BANNER,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.chatmux/config.toml).
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit debug logs on stderr.
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 📚 List models in the catalog.
    Models(models::ModelsArgs),

    /// 🔗 Show fallback chains per use case.
    Chains,

    /// 🩺 Probe provider health.
    Health(health::HealthArgs),

    /// 💬 Send a chat message.
    Chat(chat::ChatArgs),

    /// 📊 Show configuration and provider status.
    Status,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// What every command gets: the loaded config and the output format.
pub struct Context {
    pub config: ChatmuxConfig,
    pub config_path: Option<PathBuf>,
    pub output: OutputFormat,
}

impl Context {
    pub fn json(&self) -> bool {
        self.output == OutputFormat::Json
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(ChatmuxConfig, Option<PathBuf>)> {
    match path {
        Some(path) => {
            let config = ChatmuxConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            Ok((config, Some(path.clone())))
        }
        None => Ok((ChatmuxConfig::load()?, ChatmuxConfig::default_path())),
    }
}

/// Execute the CLI command.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let (config, config_path) = load_config(cli.config.as_ref())?;

    let filter = if cli.verbose { telemetry::DEFAULT_FILTER } else { "warn" };
    telemetry::init_with_filter(&config.telemetry, filter)?;

    let ctx = Context {
        config,
        config_path,
        output: cli.output,
    };

    match cli.command {
        Commands::Models(args) => models::execute(&ctx, args).await,
        Commands::Chains => chains::execute(&ctx).await,
        Commands::Health(args) => health::execute(&ctx, args).await,
        Commands::Chat(args) => chat::execute(ctx, args).await,
        Commands::Status => status::execute(&ctx, BANNER).await,
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
