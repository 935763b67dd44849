// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camhal")]
#[command(about = "Camera device abstraction and capture orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available devices
    List,

    /// Print the effective capability surface of a device
    Probe {
        /// Device id (from 'camhal list'); default: first device
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Take a photo
    Photo {
        /// Device id to use
        #[arg(short, long)]
        device: Option<String>,

        /// ISO sensitivity to apply before capturing
        #[arg(long)]
        iso: Option<i64>,

        /// Output file or directory (default: photo_TIMESTAMP in cwd)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Capture a rapid frame sequence
    Burst {
        /// Device id to use
        #[arg(short, long)]
        device: Option<String>,

        /// Number of frames
        #[arg(short, long, default_value = "5")]
        count: u32,

        /// Output directory (default: cwd)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Capture unprocessed sensor output as DNG
    Raw {
        /// Device id to use
        #[arg(short, long)]
        device: Option<String>,

        /// Output file or directory (default: raw_TIMESTAMP.dng in cwd)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record a clip
    Record {
        /// Device id to use
        #[arg(short, long)]
        device: Option<String>,

        /// Recording duration in seconds
        #[arg(long, default_value = "2")]
        duration: u64,

        /// Output file or directory (default: clip_TIMESTAMP in cwd)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=camhal=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_devices(),
        Commands::Probe { device } => cli::probe_device(device),
        Commands::Photo {
            device,
            iso,
            output,
        } => cli::take_photo(device, iso, output),
        Commands::Burst {
            device,
            count,
            output,
        } => cli::take_burst(device, count, output),
        Commands::Raw { device, output } => cli::take_raw(device, output),
        Commands::Record {
            device,
            duration,
            output,
        } => cli::record_clip(device, duration, output),
    }
}
