//! Cast Sim - runs an audio or video sender over a simulated network
//!
//! Time is simulated, so a run completes as fast as the sender can encode.

use cast_cli::{display_compact_stats, display_summary, MediaKind, SimConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cast-sim")]
#[command(about = "Cast sender network simulator", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Media to send (audio, video)
    #[arg(short, long)]
    media: Option<String>,

    /// Simulated duration in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Packet loss percentage
    #[arg(long)]
    loss: Option<f64>,

    /// One-way delay in milliseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Link capacity in kbit/s (0 for unlimited)
    #[arg(long)]
    capacity: Option<u64>,

    /// Seed for the loss process
    #[arg(long)]
    seed: Option<u64>,

    /// Target playout delay in milliseconds
    #[arg(long)]
    playout_delay: Option<u64>,

    /// Statistics interval in seconds of simulated time
    #[arg(long)]
    stats: Option<u64>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    write_example: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_media(media: &str) -> anyhow::Result<MediaKind> {
    match media {
        "audio" => Ok(MediaKind::Audio),
        "video" => Ok(MediaKind::Video),
        other => anyhow::bail!("Unknown media '{}', expected audio or video", other),
    }
}

fn build_config(args: &Args) -> anyhow::Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            SimConfig::from_file(path)?
        }
        None => SimConfig::default(),
    };

    if let Some(media) = &args.media {
        config.media = parse_media(media)?;
    }
    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }
    if let Some(loss) = args.loss {
        config.link.loss_percent = loss;
    }
    if let Some(delay) = args.delay {
        config.link.one_way_delay_ms = delay;
    }
    if let Some(capacity) = args.capacity {
        config.link.capacity_kbps = capacity;
    }
    if let Some(seed) = args.seed {
        config.link.seed = seed;
    }
    if let Some(playout_delay) = args.playout_delay {
        config.audio.transport.target_playout_delay_ms = playout_delay;
        config.video.transport.target_playout_delay_ms = playout_delay;
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = &args.write_example {
        SimConfig::example().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let config = build_config(&args)?;
    tracing::info!("Cast Sim starting...");

    let summary = cast_cli::run(&config, display_compact_stats)?;
    println!();
    display_summary(&summary);
    Ok(())
}
