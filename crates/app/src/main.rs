use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use reverser_core::{OutputRate, PartialOutputPolicy, ReverseConfig, ReverseSession};
use reverser_media::GstAsset;

/// Writes a copy of a video with its frames in reverse order.
#[derive(Parser, Debug)]
#[command(name = "reverser", version)]
struct Cli {
    /// Video to reverse.
    input: PathBuf,

    /// Where the reversed MP4 is written. An existing file is replaced.
    output: PathBuf,

    /// JSON file with session settings. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Length of each decode window in seconds.
    #[arg(long)]
    step: Option<f64>,

    /// Output frame rate: `30`, `30000/1001`, or `source` to keep the
    /// input's rate.
    #[arg(long, value_parser = parse_output_rate)]
    fps: Option<OutputRate>,

    /// Leave the partially written file in place when reversal fails.
    #[arg(long)]
    keep_partial: bool,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    print_config: bool,

    /// Debug logging. `RUST_LOG` takes precedence.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_output_rate(s: &str) -> Result<OutputRate, String> {
    if s.eq_ignore_ascii_case("source") {
        return Ok(OutputRate::MatchSource);
    }
    s.parse().map(OutputRate::Fixed).map_err(|e| e.to_string())
}

fn build_config(cli: &Cli) -> anyhow::Result<ReverseConfig> {
    let mut config = match &cli.config {
        Some(path) => ReverseConfig::from_json_file(path)?,
        None => ReverseConfig::default(),
    };
    if let Some(step) = cli.step {
        config.read_step_secs = step;
    }
    if let Some(rate) = cli.fps {
        config.output_rate = rate;
    }
    if cli.keep_partial {
        config.partial_output = PartialOutputPolicy::Keep;
    }
    config.validate().context("invalid settings")?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    let config = build_config(&cli)?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let asset = GstAsset::new(&cli.input).with_pull_batch(config.pull_batch);
    let session = ReverseSession::with_config(asset, &cli.output, config);
    log::info!(
        "session {}: reversing {} -> {}",
        session.id(),
        cli.input.display(),
        cli.output.display()
    );

    let artifact = session
        .reverse_blocking()
        .with_context(|| format!("failed to reverse {}", cli.input.display()))?;

    println!(
        "{}: {} frames, {:.3}s",
        artifact.path.display(),
        artifact.frames,
        artifact.duration.as_secs_f64()
    );
    Ok(())
}
