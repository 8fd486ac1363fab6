//! odmq CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// odmq - bounded-concurrency photogrammetry processing queue
#[derive(Parser, Debug)]
#[command(name = "odmq")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one processing task and follow it to completion
    Run {
        /// Project directory (outputs, logs and status files go here)
        #[arg(long)]
        project: PathBuf,

        /// Directory with input images
        #[arg(long)]
        images: PathBuf,

        /// Processing option as key=value (repeatable)
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Task priority (higher runs first)
        #[arg(short, long, default_value = "0")]
        priority: i32,

        /// Override the concurrency limit for this run
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Show the persisted queue state
    Queue,
    /// Validate and save queue limits to the project configuration
    Limits {
        /// Maximum concurrently running tasks
        #[arg(long)]
        max_concurrent: usize,

        /// Maximum pending tasks
        #[arg(long)]
        max_queue_size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match args.command {
        Command::Run {
            project,
            images,
            options,
            priority,
            max_concurrent,
        } => {
            let options = cli::parse_options(&options)?;
            cli::run_once(project, images, options, priority, max_concurrent).await
        }
        Command::Queue => cli::show_queue(),
        Command::Limits {
            max_concurrent,
            max_queue_size,
        } => cli::save_limits(max_concurrent, max_queue_size),
    }
}
