use chrono::NaiveDate;
use rayon::prelude::*;

use crate::burn_in::burn_in;
use crate::error::{EngineError, Result};
use crate::model::{identity, simulate};
use crate::model_params::{ModelParams, Sampling, derive_model_params};
use crate::output::{
    AlgorithmResult, ReproductionNumber, TimeValue, Trajectory, prepare_plot_data,
};
use crate::parameters::{AgeDistribution, Scenario, SeverityDatum};
use crate::results::{ExportedTimePoint, collect_totals, nearest_rank, percentile_trajectory};

pub const LOWER_PERCENTILE: f64 = 0.2;
pub const UPPER_PERCENTILE: f64 = 0.8;

#[derive(Debug, Clone, Copy)]
pub struct RunParams<'a> {
    pub scenario: &'a Scenario,
    pub severity: &'a [SeverityDatum],
    pub age_distribution: &'a AgeDistribution,
    /// Seeds parameter sampling; unused when the scenario carries no uncertainty
    pub seed: u64,
}

fn reproduction_number(
    params: &ModelParams,
    scenario: &Scenario,
    t: NaiveDate,
    immune: f64,
) -> f64 {
    params.infection.at(t) * scenario.infectious_period_days * (1.0 - immune)
}

/// Runs the deterministic trajectory and, when the scenario asks for it, the
/// sampled ensemble, and reduces them to bands and R(t).
///
/// `R0` holds one point per simulated day, starting at the first day of the
/// simulation range; no values are produced for dates before it.
///
/// Blocking and CPU-bound; ensemble members run on the rayon pool.
pub fn run(params: RunParams) -> Result<AlgorithmResult> {
    let RunParams {
        scenario,
        severity,
        age_distribution: ages,
        seed,
    } = params;
    scenario.validate()?;
    ages.validate()?;

    let t_min = scenario.simulation_time_range.begin;
    let t_max = scenario.simulation_time_range.end;
    let stochastic = scenario.has_uncertainty();
    log::info!(
        "Running scenario over {} days ({} .. {}), {} age group(s), uncertainty sampling: {}",
        scenario.simulation_time_range.num_days(),
        t_min,
        t_max,
        ages.data.len(),
        stochastic
    );

    let deterministic = derive_model_params(scenario, severity, ages, Sampling::Deterministic)?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::config("no deterministic parameter set derived"))?;
    let initial = burn_in(
        scenario.initial_number_of_cases,
        t_min,
        scenario,
        &deterministic,
        ages,
    )?;
    let middle = collect_totals(&simulate(initial.clone(), &deterministic, t_max, identity)?);

    let sampled = if stochastic {
        derive_model_params(scenario, severity, ages, Sampling::Stochastic { seed })?
    } else {
        vec![]
    };
    let ensemble: Vec<Vec<ExportedTimePoint>> = sampled
        .par_iter()
        .enumerate()
        .map(|(index, member)| {
            log::debug!("simulating ensemble member {index} (R0 = {:.3})", member.r0);
            simulate(initial.clone(), member, t_max, identity)
                .map(|dynamics| collect_totals(&dynamics))
                .map_err(|e| EngineError::member(index, member.r0, e))
        })
        .collect::<Result<_>>()?;
    if stochastic {
        log::info!("Simulated {} ensemble members", ensemble.len());
    }

    // Immunity accumulates along the deterministic trajectory; the seed's
    // cumulative recoveries already include the initial seroprevalence.
    let population = scenario.population_served as f64;
    let immunity: Vec<(NaiveDate, f64)> = middle
        .iter()
        .map(|p| (p.time, p.cumulative.recovered / population))
        .collect();
    let mean: Vec<TimeValue> = immunity
        .iter()
        .map(|&(t, immune)| TimeValue {
            t,
            y: reproduction_number(&deterministic, scenario, t, immune),
        })
        .collect();
    let (lower, upper) = if stochastic {
        let lo = nearest_rank(sampled.len(), LOWER_PERCENTILE);
        let hi = nearest_rank(sampled.len(), UPPER_PERCENTILE);
        immunity
            .iter()
            .map(|&(t, immune)| {
                let mut ys: Vec<f64> = sampled
                    .iter()
                    .map(|p| reproduction_number(p, scenario, t, immune))
                    .collect();
                ys.sort_by(f64::total_cmp);
                (TimeValue { t, y: ys[lo] }, TimeValue { t, y: ys[hi] })
            })
            .unzip()
    } else {
        (mean.clone(), mean.clone())
    };

    let trajectory = if stochastic {
        Trajectory {
            lower: percentile_trajectory(&ensemble, LOWER_PERCENTILE)?,
            upper: percentile_trajectory(&ensemble, UPPER_PERCENTILE)?,
            middle,
        }
    } else {
        Trajectory {
            lower: middle.clone(),
            upper: middle.clone(),
            middle,
        }
    };

    Ok(AlgorithmResult {
        plot_data: prepare_plot_data(&trajectory),
        trajectory,
        r0: ReproductionNumber { mean, lower, upper },
    })
}
