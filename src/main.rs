//! Promptgate - quota-aware broker for a generative text API
//!
//! Operational CLI entry point: issue a single prompt through the shared
//! broker. Worker processes link `promptgate-broker` directly; this
//! binary exists for smoke tests and manual pokes at the key pool.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use promptgate_broker::{Broker, BrokerConfig, KeyPool};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Issue a prompt through the quota-aware broker and print the response.
#[derive(Debug, Parser)]
#[command(name = "promptgate", version, about)]
struct Cli {
    /// Prompt text to send to the provider
    prompt: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.5)]
    temperature: f32,

    /// Maximum output tokens
    #[arg(long = "max-tokens", default_value_t = 1000)]
    max_tokens: u32,

    /// Override the state directory (default: ~/.promptgate)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptgate=info,promptgate_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = BrokerConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    let broker = Broker::new(config, KeyPool::from_env())?;
    let text = broker
        .generate(&cli.prompt, cli.temperature, cli.max_tokens)
        .await?;
    println!("{}", text);

    Ok(())
}
