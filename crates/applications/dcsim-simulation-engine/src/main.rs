//! dcsim CLI
//!
//! Runs one datacenter descriptor to completion and prints (or writes) the
//! windowed utilization report.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dcsim_simulation_engine::{
    analyzer::EntitySelector,
    report::{render_overall, render_summary, render_windows, UtilizationReport},
    DatacenterConfig, Simulator,
};

#[derive(Parser, Debug)]
#[command(name = "dcsim")]
#[command(about = "Simulate a containerized datacenter and analyze its utilization", long_about = None)]
struct Args {
    /// Datacenter descriptor (JSON)
    config: PathBuf,

    /// Analyze every entity (default when no --entity is given)
    #[arg(long, conflicts_with = "entity")]
    all_entities: bool,

    /// Entity to analyze, by name (repeatable)
    #[arg(long)]
    entity: Vec<String>,

    /// Analysis window, in ticks
    #[arg(long, default_value_t = 1)]
    time_window: u64,

    /// Fluctuation seed; overrides simulation.seed
    #[arg(long)]
    seed: Option<u64>,

    /// Write the report as JSON instead of printing tables
    #[arg(long)]
    write_to_file: bool,

    /// Attach the raw per-tick usage series to the written report
    #[arg(long, requires = "write_to_file")]
    include_samples: bool,

    /// Directory for written reports
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcsim=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = DatacenterConfig::from_path(&args.config)
        .with_context(|| format!("Failed to load descriptor {}", args.config.display()))?;
    let seed = args.seed.or(config.seed()).unwrap_or(0);

    let selector = if args.all_entities || args.entity.is_empty() {
        EntitySelector::All
    } else {
        EntitySelector::Names(args.entity.clone())
    };

    info!(config = %args.config.display(), seed, window = args.time_window, "running simulation");
    let run = Simulator::new(&config, seed)
        .context("Failed to build simulator")?
        .run()
        .context("Simulation aborted")?;

    let report = UtilizationReport::build_with(&run, &selector, args.time_window, args.include_samples)
        .context("Analysis failed")?;

    println!("{}", render_summary(&report.summary));

    if args.write_to_file {
        let path = report
            .write_json(&args.output_dir)
            .with_context(|| format!("Failed to write report to {}", args.output_dir.display()))?;
        println!("Report written to {}", path.display());
    } else {
        println!("{}", render_windows(&report.windows));
        println!("{}", render_overall(&report.overall));
    }

    Ok(())
}
