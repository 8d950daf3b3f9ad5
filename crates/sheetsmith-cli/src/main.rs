//! Sheetsmith CLI - generate sprite sheets from an inference queue

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{asset, compose, config, generate, health};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sheetsmith")]
#[command(about = "AI sprite generation to engine-ready sprite sheets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file to use instead of the layered global/project lookup
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Inference service endpoint (overrides config)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Output directory for sheets, metadata and the manifest (overrides config)
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// Use the in-process stub service instead of the network
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every asset of a TOML batch file
    Generate {
        /// Path to batch file ([[asset]] tables)
        batch: PathBuf,

        /// Skip writing build_manifest.toml
        #[arg(long)]
        no_manifest: bool,
    },

    /// Generate a single asset
    Asset {
        /// Asset key; names the sheet and metadata files
        key: String,

        /// Generation prompt
        #[arg(long)]
        prompt: String,

        /// Number of frames
        #[arg(long, default_value = "1")]
        frames: u32,

        /// Frame width in pixels
        #[arg(long, default_value = "64")]
        width: u32,

        /// Frame height in pixels
        #[arg(long, default_value = "64")]
        height: u32,

        /// Generate an animation at this frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Mark the animation as non-looping
        #[arg(long)]
        no_loop: bool,
    },

    /// Compose local PNG frames into a sheet without the service
    Compose {
        /// Asset key; names the sheet and metadata files
        key: String,

        /// Frame images, in sheet order
        #[arg(required = true)]
        frames: Vec<PathBuf>,

        /// Normalize frames to this width
        #[arg(long)]
        width: Option<u32>,

        /// Normalize frames to this height
        #[arg(long)]
        height: Option<u32>,

        /// Record animation playback at this frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Key out the border background before composing
        #[arg(long)]
        key_background: bool,
    },

    /// Check that the inference service is reachable
    Health,

    /// Print the resolved configuration
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { batch, no_manifest } => generate::run(&cli.global, &batch, !no_manifest),
        Commands::Asset {
            key,
            prompt,
            frames,
            width,
            height,
            fps,
            no_loop,
        } => asset::run(
            &cli.global,
            asset::AssetArgs {
                key,
                prompt,
                frames,
                width,
                height,
                fps,
                looping: !no_loop,
            },
        ),
        Commands::Compose {
            key,
            frames,
            width,
            height,
            fps,
            key_background,
        } => compose::run(
            &cli.global,
            compose::ComposeArgs {
                key,
                frames,
                width,
                height,
                fps,
                key_background,
            },
        ),
        Commands::Health => health::run(&cli.global),
        Commands::Config => config::run(&cli.global),
    }
}
