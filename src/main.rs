// SPDX-License-Identifier: GPL-3.0-only

use camera_preview::RenderMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-preview")]
#[command(about = "Zero-copy camera preview pipeline")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the preview pipeline against a synthetic test-pattern camera
    Run {
        /// Pipeline configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many presented frames
        #[arg(short, long, default_value = "300")]
        frames: u64,

        /// Force a rendering mode (direct-gpu-interop, software-queue)
        #[arg(short, long)]
        mode: Option<RenderMode>,

        /// Device identifier reported by the synthetic camera
        #[arg(short, long, default_value = "synthetic:color-bars")]
        device_id: String,

        /// Capture frame rate of the synthetic camera
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Deliver frames in system memory instead of GPU textures (the
        /// pipeline still renders on a GPU, so a render device is required)
        #[arg(long)]
        cpu_frames: bool,
    },

    /// Report the render device the process would use
    CheckDevice,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_preview=trace, RUST_LOG=info
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
        Commands::Run {
            config,
            frames,
            mode,
            device_id,
            fps,
            cpu_frames,
        } => cli::run_preview(cli::RunOptions {
            config,
            frames,
            mode,
            device_id,
            fps,
            cpu_frames,
        }),
        Commands::CheckDevice => cli::check_device(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cpu_frames_help_mentions_render_device() {
        let command = Cli::command();
        let run = command.find_subcommand("run").expect("run subcommand");
        let cpu_frames = run
            .get_arguments()
            .find(|arg| arg.get_id() == "cpu_frames")
            .expect("cpu_frames flag");
        let help = cpu_frames.get_help().expect("help text").to_string();
        assert!(help.contains("render device"), "{}", help);
    }

    #[test]
    fn test_run_parses_software_queue_with_cpu_frames() {
        let cli = Cli::try_parse_from([
            "camera-preview",
            "run",
            "--cpu-frames",
            "--mode",
            "software-queue",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run {
                cpu_frames, mode, ..
            } => {
                assert!(cpu_frames);
                assert_eq!(mode, Some(RenderMode::SoftwareQueue));
            }
            Commands::CheckDevice => panic!("Expected run"),
        }
    }
}
