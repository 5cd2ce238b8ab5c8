//! Main entrypoint for the LiveMol console.
//!
//! Loads configuration from the environment, initializes logging, and runs one
//! live session against the Gemini Live API until the user quits.

use anyhow::Context;
use clap::Parser;
use livemol_console::config::Config;
use livemol_console::runtime::{self, RunArgs};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Talk to a live model about protein structures.
#[derive(Debug, Parser)]
#[command(name = "livemol", version, about)]
struct Cli {
    /// Text sent as the first user turn.
    #[arg(short, long)]
    prompt: Option<String>,

    /// WAV file streamed as realtime audio input.
    #[arg(long, value_name = "WAV")]
    audio_in: Option<PathBuf>,

    /// Where to save the model's audio replies.
    #[arg(long, value_name = "WAV")]
    audio_out: Option<PathBuf>,

    /// Overrides the default system instruction.
    #[arg(long)]
    system: Option<String>,

    /// Exit after the model's first complete turn.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so model output on stdout stays clean.
    let filter = EnvFilter::new(format!(
        "{},tungstenite=warn,tokio_tungstenite=warn",
        config.log_level
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(endpoint = %config.endpoint, "Configuration loaded.");

    // --- 3. Run the session ---
    runtime::run(
        config,
        RunArgs {
            prompt: cli.prompt,
            audio_in: cli.audio_in,
            audio_out: cli.audio_out,
            system: cli.system,
            once: cli.once,
        },
    )
    .await
}
