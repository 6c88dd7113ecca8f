// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use dualcast::Config;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "dualcast")]
#[command(about = "Live preview plus hardware-encoded recording of a video source")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: <config dir>/Dualcast/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the source to MP4 while rendering a preview
    Record {
        /// Source: test, v4l2:<device> or pipewire[:<target>]
        #[arg(short, long)]
        source: Option<String>,

        /// Frame width (rounded up to even for the encoder)
        #[arg(long)]
        width: Option<u32>,

        /// Frame height (rounded up to even for the encoder)
        #[arg(long)]
        height: Option<u32>,

        /// Bitrate in bits per second
        #[arg(short, long)]
        bitrate: Option<u32>,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output file path (default: <output dir>/video_TIMESTAMP.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// GStreamer encoder element to use instead of automatic selection
        #[arg(short, long)]
        encoder: Option<String>,

        /// Save the last preview frame as PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Render the source to the preview only
    Preview {
        /// Source: test, v4l2:<device> or pipewire[:<target>]
        #[arg(short, long)]
        source: Option<String>,

        /// Preview duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },

    /// List available H.264 encoders in priority order
    Encoders,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let (config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // RUST_LOG wins over the configured filter
    // Examples: RUST_LOG=debug, RUST_LOG=dualcast=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Ignoring unreadable configuration, using defaults");
    }

    match cli.command {
        Commands::Record {
            source,
            width,
            height,
            bitrate,
            duration,
            output,
            encoder,
            snapshot,
        } => cli::record(
            &config,
            cli::RecordArgs {
                source,
                width,
                height,
                bitrate,
                duration,
                output,
                encoder,
                snapshot,
            },
        ),
        Commands::Preview { source, duration } => cli::preview(&config, source, duration),
        Commands::Encoders => cli::list_encoders(),
    }
}
