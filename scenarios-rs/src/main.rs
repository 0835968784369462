use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scenario_runner::{AGE_DISTRIBUTION_FILE, Environment, SEVERITY_FILE};
use scenarios::output::CSV_HEADERS;
use scenarios::{AgeDistributionSource, RunParams, Scenario, SeverityTable, run};

/// Run an age-stratified epidemic scenario.
///
/// Without --scenario a run document is read from stdin.
#[derive(Parser, Debug)]
#[command(name = "scenarios", version, about)]
struct Args {
    /// Scenario parameters (JSON, or TOML by extension)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Age distribution (single distribution or catalog); the bundled catalog
    /// is searched for the scenario's distribution name when absent
    #[arg(long, requires = "scenario")]
    age: Option<PathBuf>,

    /// Severity table; the bundled default is used when absent
    #[arg(long, requires = "scenario")]
    severity: Option<PathBuf>,

    /// Output file for the result JSON (stdout when absent)
    #[arg(long, requires = "scenario")]
    out: Option<PathBuf>,

    /// Seed for parameter sampling; overrides any seed in the input
    #[arg(long)]
    seed: Option<u64>,

    /// Also write the trajectory bands as CSV
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn execute(args: Args) -> anyhow::Result<()> {
    let mut env = match &args.scenario {
        Some(path) => Environment::from_paths(
            path,
            args.age.as_deref(),
            args.severity.as_deref(),
            args.out.as_deref(),
        )
        .and_then(|env| env.with_input_type::<Scenario>()),
        None => Environment::<Scenario>::load(),
    }
    .context("failed to read scenario")?;
    if let Some(seed) = args.seed {
        env.seed = Some(seed);
    }
    let scenario = env.input.as_ref().context("no scenario in run input")?;

    let age_distributions = match env
        .load_file::<AgeDistributionSource>(AGE_DISTRIBUTION_FILE)
        .context("failed to read age distribution")?
    {
        Some(source) => source,
        None => {
            log::info!("Using bundled age distributions");
            AgeDistributionSource::bundled()?
        }
    };
    let age_distribution = age_distributions.select(&scenario.age_distribution_name)?;
    let severity = match env
        .load_file::<SeverityTable>(SEVERITY_FILE)
        .context("failed to read severity table")?
    {
        Some(table) => table,
        None => {
            log::info!("Using bundled severity table");
            SeverityTable::bundled()?
        }
    };

    let seed = env.resolved_seed();
    log::info!(
        "Input digest {}, seed {seed}, replicate {}",
        env.input_digest(),
        env.replicate
    );

    let result = run(RunParams {
        scenario,
        severity: &severity.data,
        age_distribution: &age_distribution,
        seed,
    })?;
    log::info!("Run complete");

    env.write_json("result.json", &result)
        .context("failed to write result")?;
    if let Some(path) = &args.csv {
        env.write_csv(path, &CSV_HEADERS, &result.trajectory.csv_rows())
            .context("failed to write trajectory CSV")?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = execute(args) {
        eprintln!("Run failed: {e:#}");
        std::process::exit(1);
    }
}
