use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ftm_sweep::output::create_timestamped_output_dir;
use ftm_sweep::sweep::run_sweep_into_dir;
use ftm_sweep::SweepConfig;

#[derive(Debug, Parser)]
#[command(name = "ftm_sweep")]
#[command(about = "Parameter sweep driver for ns-3 Wi-Fi FTM ranging simulations")]
struct Cli {
    /// Sweep configuration (TOML or JSON). Falls back to ./ftm-sweep.toml, then defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base directory; each run gets a timestamped subdirectory
    #[arg(long, default_value = "outputs")]
    outdir: PathBuf,

    /// Exact run directory, bypassing the timestamped allocation
    #[arg(long, conflicts_with = "outdir")]
    run_dir: Option<PathBuf>,

    /// Trials per combination
    #[arg(long)]
    trials: Option<usize>,

    /// Seed for the per-trial simulator seeds
    #[arg(long)]
    seed: Option<u64>,

    /// Kill a simulator run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// List the combinations that would run, then exit
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = SweepConfig::load_or_default(cli.config.as_deref())
        .context("failed to load sweep configuration")?;
    if let Some(trials) = cli.trials {
        config.trials = trials;
    }
    if let Some(seed) = cli.seed {
        config.random_seed = Some(seed);
    }
    if let Some(timeout) = cli.timeout_secs {
        config.timeout_secs = Some(timeout);
    }
    config.validate().context("invalid sweep configuration")?;

    if cli.dry_run {
        return dry_run(&config);
    }

    let run_dir = match cli.run_dir {
        Some(dir) => dir,
        None => create_timestamped_output_dir(&cli.outdir).with_context(|| {
            format!("failed to create run directory under {}", cli.outdir.display())
        })?,
    };

    let report = run_sweep_into_dir(&config, config.process_simulator(), &run_dir)
        .with_context(|| format!("sweep failed in {}", run_dir.display()))?;

    info!(
        written = report.summary.written_combinations,
        skipped = report.summary.skipped_combinations,
        degenerate = report.summary.degenerate_combinations,
        "sweep complete"
    );
    println!("Run directory: {}", report.run_dir.display());
    println!("Results: {}", report.results_path.display());
    println!("Summary: {}", report.summary_path.display());
    println!("Plot data: {}", report.plot_data_path.display());
    Ok(())
}

fn dry_run(config: &SweepConfig) -> Result<()> {
    let space = config.parameter_space()?;
    let filter = config.combination_filter();
    let combinations = space.combinations();
    if combinations.is_empty() {
        bail!("parameter space is empty");
    }

    let mut kept = 0usize;
    for combination in &combinations {
        match filter.matching_rule(combination) {
            Some(rule) => println!("skip  {combination}  ({})", rule.name),
            None => {
                kept += 1;
                println!("run   {combination}");
            }
        }
    }

    println!(
        "{kept} of {} combinations would run, {} trials each",
        combinations.len(),
        config.trials
    );
    Ok(())
}
