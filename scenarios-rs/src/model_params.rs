//! Turns a validated scenario plus its severity and age tables into concrete
//! per-day model rates, either once with point values or once per sampled
//! ensemble member.

use std::collections::HashMap;
use std::f64::consts::PI;

use chrono::NaiveDate;
use nalgebra::DVector;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Uniform};

use crate::error::{EngineError, Result};
use crate::parameters::{AgeDistribution, DateRange, NumberRange, Scenario, SeverityDatum};

/// Exposed individuals pass through this many sub-stages before becoming
/// infectious, which turns the exponential latency into an Erlang delay.
pub const EXPOSED_STAGES: usize = 3;

/// Seasonal phase is measured from this date.
const SEASON_ORIGIN: NaiveDate = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// One parameter set built from point values
    Deterministic,
    /// `number_stochastic_runs` parameter sets drawn uniformly within the
    /// scenario's plausible bounds
    Stochastic { seed: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MitigationFactor {
    pub time_range: DateRange,
    /// Multiplier on transmission, `1 - reduction / 100`
    pub factor: f64,
}

/// Time-varying transmission rate: average rate, seasonal forcing and the
/// mitigation schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct InfectionRate {
    pub average: f64,
    pub seasonal_forcing: f64,
    pub peak_month: u32,
    pub mitigation: Vec<MitigationFactor>,
}

impl InfectionRate {
    pub fn seasonality(&self, date: NaiveDate) -> f64 {
        let years = (date - SEASON_ORIGIN).num_days() as f64 / 365.0;
        let phase = 2.0 * PI * (years - self.peak_month as f64 / 12.0);
        1.0 + self.seasonal_forcing * phase.cos()
    }

    /// Product of the factors of every interval active on `date`.
    pub fn mitigation(&self, date: NaiveDate) -> f64 {
        self.mitigation
            .iter()
            .filter(|m| m.time_range.contains(date))
            .map(|m| m.factor)
            .product()
    }

    pub fn at(&self, date: NaiveDate) -> f64 {
        self.average * self.seasonality(date) * self.mitigation(date)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fractions {
    pub severe: DVector<f64>,
    pub critical: DVector<f64>,
    pub fatal: DVector<f64>,
    pub isolated: DVector<f64>,
}

/// Per-day transition rates. `latency` applies to every exposed sub-stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Rates {
    pub latency: f64,
    pub recovery: DVector<f64>,
    pub severe: DVector<f64>,
    pub discharge: DVector<f64>,
    pub critical: DVector<f64>,
    pub stabilize: DVector<f64>,
    pub fatality: DVector<f64>,
    pub overflow_stabilize: DVector<f64>,
    pub overflow_fatality: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub population_served: u64,
    /// R0 this parameter set was built from, before seasonality and mitigation
    pub r0: f64,
    pub age_distribution: DVector<f64>,
    pub imports_per_day: DVector<f64>,
    pub icu_beds: f64,
    pub frac: Fractions,
    pub rate: Rates,
    pub infection: InfectionRate,
}

impl ModelParams {
    pub fn age_groups(&self) -> usize {
        self.age_distribution.len()
    }
}

/// Matches every age group of the distribution with exactly one severity row.
fn align_severity<'a>(
    ages: &AgeDistribution,
    severity: &'a [SeverityDatum],
) -> Result<Vec<&'a SeverityDatum>> {
    let mut by_group = HashMap::new();
    for datum in severity {
        datum.validate()?;
        if by_group.insert(&datum.age_group, datum).is_some() {
            return Err(EngineError::config(format!(
                "age group '{}' appears twice in the severity table",
                datum.age_group
            )));
        }
    }

    let aligned = ages
        .age_groups()
        .map(|group| {
            by_group.remove(group).ok_or_else(|| {
                EngineError::config(format!(
                    "severity table has no entry for age group '{group}'"
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(extra) = by_group.keys().next() {
        return Err(EngineError::config(format!(
            "severity table references age group '{extra}' missing from age distribution '{}'",
            ages.name
        )));
    }
    Ok(aligned)
}

fn column(rows: &[&SeverityDatum], f: impl Fn(&SeverityDatum) -> f64) -> DVector<f64> {
    DVector::from_iterator(rows.len(), rows.iter().map(|&d| f(d)))
}

fn uniform(range: NumberRange, what: &str) -> Result<Uniform<f64>> {
    Uniform::new_inclusive(range.begin, range.end).map_err(|e| {
        EngineError::config(format!(
            "cannot sample {what} from [{}, {}]: {e}",
            range.begin, range.end
        ))
    })
}

/// R0 and one transmission reduction per mitigation interval, for every
/// parameter set to build.
fn draw_samples(scenario: &Scenario, sampling: Sampling) -> Result<Vec<(f64, Vec<f64>)>> {
    match sampling {
        Sampling::Deterministic => {
            let reductions = scenario
                .mitigation_intervals
                .iter()
                .map(|m| m.transmission_reduction.midpoint())
                .collect();
            Ok(vec![(scenario.r0, reductions)])
        }
        Sampling::Stochastic { seed } => {
            let r0_range = scenario
                .r0_bounds
                .unwrap_or(NumberRange::new(scenario.r0, scenario.r0));
            let r0_dist = uniform(r0_range, "r0")?;
            let reduction_dists = scenario
                .mitigation_intervals
                .iter()
                .map(|m| uniform(m.transmission_reduction, &m.name))
                .collect::<Result<Vec<_>>>()?;

            let mut rng = StdRng::seed_from_u64(seed);
            let samples = (0..scenario.number_stochastic_runs)
                .map(|_| {
                    let r0 = r0_dist.sample(&mut rng);
                    let reductions = reduction_dists
                        .iter()
                        .map(|dist| dist.sample(&mut rng))
                        .collect();
                    (r0, reductions)
                })
                .collect();
            Ok(samples)
        }
    }
}

pub fn derive_model_params(
    scenario: &Scenario,
    severity: &[SeverityDatum],
    ages: &AgeDistribution,
    sampling: Sampling,
) -> Result<Vec<ModelParams>> {
    ages.validate()?;
    let rows = align_severity(ages, severity)?;
    let n = rows.len();

    let frac = Fractions {
        severe: column(&rows, |d| d.severe * d.confirmed),
        critical: column(&rows, |d| d.critical),
        fatal: column(&rows, |d| d.fatal),
        isolated: column(&rows, |d| d.isolated),
    };

    let infectious = scenario.infectious_period_days;
    let hospital = scenario.hospital_stay_days;
    let icu = scenario.icu_stay_days;
    let overflow_fatal = frac.fatal.map(|f| (scenario.overflow_severity * f).min(1.0));
    let rate = Rates {
        latency: EXPOSED_STAGES as f64 / scenario.latency_days,
        recovery: frac.severe.map(|f| (1.0 - f) / infectious),
        severe: frac.severe.map(|f| f / infectious),
        discharge: frac.critical.map(|f| (1.0 - f) / hospital),
        critical: frac.critical.map(|f| f / hospital),
        stabilize: frac.fatal.map(|f| (1.0 - f) / icu),
        fatality: frac.fatal.map(|f| f / icu),
        overflow_stabilize: overflow_fatal.map(|f| (1.0 - f) / icu),
        overflow_fatality: overflow_fatal.map(|f| f / icu),
    };

    let template = ModelParams {
        population_served: scenario.population_served,
        r0: scenario.r0,
        age_distribution: DVector::from_vec(ages.weights()),
        imports_per_day: DVector::from_element(n, scenario.imports_per_day / n as f64),
        icu_beds: scenario.icu_beds,
        frac,
        rate,
        infection: InfectionRate {
            average: scenario.r0 / infectious,
            seasonal_forcing: scenario.seasonal_forcing,
            peak_month: scenario.peak_month,
            mitigation: vec![],
        },
    };

    let params: Vec<ModelParams> = draw_samples(scenario, sampling)?
        .into_iter()
        .map(|(r0, reductions)| {
            let mut params = template.clone();
            params.r0 = r0;
            params.infection.average = r0 / infectious;
            params.infection.mitigation = scenario
                .mitigation_intervals
                .iter()
                .zip(reductions)
                .map(|(interval, reduction)| MitigationFactor {
                    time_range: interval.time_range,
                    factor: 1.0 - reduction / 100.0,
                })
                .collect();
            params
        })
        .collect();

    log::debug!(
        "derived {} parameter set(s) for {} age group(s) ({:?})",
        params.len(),
        n,
        sampling
    );
    Ok(params)
}
