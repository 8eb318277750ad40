// SPDX-License-Identifier: GPL-3.0-only

use camera_engine::BackendKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-engine")]
#[command(about = "Drive a camera through its lifecycle from the command line")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List {
        /// Hardware API family (legacy, session)
        #[arg(short, long, default_value = "session")]
        backend: BackendKind,
    },

    /// Take a photo
    Photo {
        /// Hardware API family (legacy, session)
        #[arg(short, long, default_value = "session")]
        backend: BackendKind,

        /// Use the front camera
        #[arg(short, long)]
        front: bool,

        /// Take a snapshot of the preview instead of a full picture
        #[arg(short, long)]
        snapshot: bool,

        /// Output file path (default: ~/Pictures/camera-engine/photo_TIMESTAMP.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record a video
    Video {
        /// Hardware API family (legacy, session)
        #[arg(short, long, default_value = "session")]
        backend: BackendKind,

        /// Use the front camera
        #[arg(short, long)]
        front: bool,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output file path (default: ~/Videos/camera-engine/video_TIMESTAMP.cevid)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the picture and video sizes a camera supports
    Sizes {
        /// Hardware API family (legacy, session)
        #[arg(short, long, default_value = "session")]
        backend: BackendKind,

        /// Use the front camera
        #[arg(short, long)]
        front: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=camera_engine=debug
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
        Commands::List { backend } => cli::list_cameras(backend),
        Commands::Photo {
            backend,
            front,
            snapshot,
            output,
        } => cli::take_photo(backend, front, snapshot, output),
        Commands::Video {
            backend,
            front,
            duration,
            output,
        } => cli::record_video(backend, front, duration, output),
        Commands::Sizes { backend, front } => cli::print_sizes(backend, front),
    }
}
