//! Discrete-time, age-stratified compartment model.
//!
//! Each compartment loses `content * (1 - exp(-sum(rates) * dt))` per step and
//! that outflow is split across destinations in proportion to their rates, so a
//! compartment can never hand out more than it holds.

use chrono::NaiveDate;
use nalgebra::DVector;

use crate::error::{EngineError, Result};
use crate::model_params::ModelParams;
use crate::state::{CompartmentState, CumulativeState, SimulationTimePoint};

/// Default transform for `evolve`.
pub fn identity(x: f64) -> f64 {
    x
}

/// Clamps into `[0, cap]`, letting NaN through so it is caught downstream.
fn bounded(x: f64, cap: f64) -> f64 {
    if x.is_nan() { x } else { x.max(0.0).min(cap) }
}

struct Outflow {
    total: DVector<f64>,
    /// One vector per destination, in the order the rates were given
    to: Vec<DVector<f64>>,
}

fn outflow<F>(content: &DVector<f64>, rates: &[&DVector<f64>], dt: f64, transform: &F) -> Outflow
where
    F: Fn(f64) -> f64,
{
    let n = content.len();
    let total_rate = DVector::from_fn(n, |a, _| rates.iter().map(|r| r[a]).sum::<f64>());
    let total = DVector::from_fn(n, |a, _| {
        let c = content[a];
        bounded(transform(c * (1.0 - (-total_rate[a] * dt).exp())), c)
    });
    let to = rates
        .iter()
        .map(|r| {
            DVector::from_fn(n, |a, _| {
                if total_rate[a] > 0.0 {
                    total[a] * r[a] / total_rate[a]
                } else {
                    0.0
                }
            })
        })
        .collect();
    Outflow { total, to }
}

/// Advances `state` to `next`, leaving `state` untouched. `transform` is
/// applied to every compartment outflow before it is bounded by the
/// compartment's content; pass [`identity`] for the plain model.
pub fn evolve<F>(
    state: &SimulationTimePoint,
    params: &ModelParams,
    next: NaiveDate,
    transform: F,
) -> Result<SimulationTimePoint>
where
    F: Fn(f64) -> f64,
{
    let t = state.time;
    let days = (next - t).num_days();
    if days <= 0 {
        return Err(EngineError::config(format!(
            "cannot step from {t} to {next}"
        )));
    }
    let dt = days as f64;
    let now = &state.current;
    let n = now.age_groups();
    let rate = &params.rate;

    let infection_rate = params.infection.at(t);
    if !(infection_rate.is_finite() && infection_rate >= 0.0) {
        return Err(EngineError::numerical(
            t,
            format!("infection rate evaluated to {infection_rate} (R0 = {})", params.r0),
        ));
    }

    // Susceptible -> Exposed
    let transmitting = params.frac.isolated.map(|f| 1.0 - f);
    let pressure = now.infectious.dot(&transmitting) / params.population_served as f64;
    let force = infection_rate * pressure;
    let infections = DVector::from_fn(n, |a, _| {
        let s = now.susceptible[a];
        let infected = transform(s * (1.0 - (-force * dt).exp()));
        bounded(infected + params.imports_per_day[a] * dt, s)
    });

    // Exposed sub-stages -> Infectious
    let latency = DVector::from_element(n, rate.latency);
    let progressed: Vec<DVector<f64>> = now
        .exposed
        .iter()
        .map(|stage| outflow(stage, &[&latency], dt, &transform).total)
        .collect();
    let mut inflow = infections.clone();
    let mut exposed = Vec::with_capacity(now.exposed.len());
    for (stage, out) in now.exposed.iter().zip(&progressed) {
        exposed.push(stage + &inflow - out);
        inflow = out.clone();
    }
    let into_infectious = inflow;

    // Infectious -> Recovered | Severe
    let infectious_out = outflow(&now.infectious, &[&rate.recovery, &rate.severe], dt, &transform);
    // Severe -> Recovered | Critical
    let severe_out = outflow(&now.severe, &[&rate.discharge, &rate.critical], dt, &transform);
    // Critical -> Recovered | Fatal
    let critical_out = outflow(&now.critical, &[&rate.stabilize, &rate.fatality], dt, &transform);
    // Overflow -> Recovered | Fatal
    let overflow_out = outflow(
        &now.overflow,
        &[&rate.overflow_stabilize, &rate.overflow_fatality],
        dt,
        &transform,
    );

    // Critical-care capacity: demand is admitted up to the free beds, the rest
    // overflows. Occupancy above capacity is moved to overflow as well.
    let remaining = &now.critical - &critical_out.total;
    let occupied = remaining.sum();
    let free = (params.icu_beds - occupied).max(0.0);
    let demand = &severe_out.to[1];
    let demand_total = demand.sum();
    let admitted_share = if demand_total <= free {
        1.0
    } else {
        free / demand_total
    };
    let admitted = demand * admitted_share;
    let overflowing = demand * (1.0 - admitted_share);
    let displaced = if occupied > params.icu_beds {
        &remaining * ((occupied - params.icu_beds) / occupied)
    } else {
        DVector::zeros(n)
    };

    let recovering =
        &infectious_out.to[0] + &severe_out.to[0] + &critical_out.to[0] + &overflow_out.to[0];
    let dying = &critical_out.to[1] + &overflow_out.to[1];

    let current = CompartmentState {
        susceptible: &now.susceptible - &infections,
        exposed,
        infectious: &now.infectious + &into_infectious - &infectious_out.total,
        severe: &now.severe + &infectious_out.to[1] - &severe_out.total,
        critical: &remaining - &displaced + &admitted,
        overflow: &now.overflow + &overflowing + &displaced - &overflow_out.total,
        recovered: &now.recovered + &recovering,
        fatal: &now.fatal + &dying,
    };
    let cumulative = CumulativeState {
        recovered: &state.cumulative.recovered + &recovering,
        hospitalized: &state.cumulative.hospitalized + &infectious_out.to[1],
        critical: &state.cumulative.critical + &admitted + &overflowing,
        fatality: &state.cumulative.fatality + &dying,
    };

    let evolved = SimulationTimePoint {
        time: next,
        current,
        cumulative,
    };
    if !evolved.is_finite() {
        return Err(EngineError::numerical(
            next,
            format!("non-finite compartment values (R0 = {})", params.r0),
        ));
    }
    Ok(evolved)
}

/// Steps one day at a time from `initial` through `t_max`, inclusive of both.
pub fn simulate<F>(
    initial: SimulationTimePoint,
    params: &ModelParams,
    t_max: NaiveDate,
    transform: F,
) -> Result<Vec<SimulationTimePoint>>
where
    F: Fn(f64) -> f64,
{
    let days = (t_max - initial.time).num_days().max(0) as usize;
    let mut dynamics = Vec::with_capacity(days + 1);
    let mut current = initial;
    while current.time < t_max {
        let next_day = current
            .time
            .succ_opt()
            .ok_or_else(|| EngineError::numerical(current.time, "date out of range"))?;
        let next = evolve(&current, params, next_day, &transform)?;
        dynamics.push(current);
        current = next;
    }
    dynamics.push(current);
    Ok(dynamics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize::initialize_population;
    use crate::model_params::{Sampling, derive_model_params};
    use crate::parameters::fixtures::*;
    use crate::parameters::{DateRange, MitigationInterval, NumberRange, Scenario};

    fn params_for(scenario: &Scenario) -> ModelParams {
        derive_model_params(
            scenario,
            &three_group_severity(),
            &three_groups(),
            Sampling::Deterministic,
        )
        .unwrap()
        .remove(0)
    }

    fn seed_for(scenario: &Scenario) -> SimulationTimePoint {
        initialize_population(
            scenario.population_served,
            scenario.initial_number_of_cases,
            scenario.simulation_time_range.begin,
            scenario,
            &three_groups(),
        )
    }

    fn run(scenario: &Scenario) -> Vec<SimulationTimePoint> {
        simulate(
            seed_for(scenario),
            &params_for(scenario),
            scenario.simulation_time_range.end,
            identity,
        )
        .unwrap()
    }

    #[test]
    fn test_simulate_covers_range_inclusive() {
        let scenario = single_group_scenario();
        let dynamics = run(&scenario);
        assert_eq!(dynamics.len(), 61);
        assert_eq!(dynamics[0].time, date("2020-03-01"));
        assert_eq!(dynamics[60].time, date("2020-04-30"));
    }

    #[test]
    fn test_non_negative_under_harsh_parameters() {
        let mut scenario = single_group_scenario();
        scenario.r0 = 12.0;
        scenario.latency_days = 0.5;
        scenario.infectious_period_days = 0.5;
        scenario.hospital_stay_days = 0.5;
        scenario.icu_stay_days = 0.5;
        scenario.icu_beds = 0.0;
        scenario.overflow_severity = 5.0;
        scenario.initial_number_of_cases = 50_000;
        scenario.simulation_time_range = DateRange::new(date("2020-03-01"), date("2020-12-31"));
        for point in run(&scenario) {
            assert!(point.min_value() >= 0.0, "negative value on {}", point.time);
        }
    }

    #[test]
    fn test_population_is_conserved() {
        let scenario = single_group_scenario();
        let dynamics = run(&scenario);
        let start = dynamics[0].current.population().sum();
        for point in &dynamics {
            let total = point.current.population().sum();
            assert!(f64::abs(total - start) / start < 1e-9);
        }
    }

    #[test]
    fn test_evolve_does_not_mutate_input() {
        let scenario = single_group_scenario();
        let params = params_for(&scenario);
        let seed = seed_for(&scenario);
        let before = seed.clone();
        let next = evolve(&seed, &params, date("2020-03-02"), identity).unwrap();
        assert_eq!(seed, before);
        assert_eq!(next.time, date("2020-03-02"));
        assert_ne!(next.current, seed.current);
    }

    #[test]
    fn test_cumulative_never_decreases() {
        let scenario = single_group_scenario();
        let dynamics = run(&scenario);
        for pair in dynamics.windows(2) {
            let (a, b) = (&pair[0].cumulative, &pair[1].cumulative);
            for (x, y) in a.vectors().zip(b.vectors()) {
                assert!(x.iter().zip(y.iter()).all(|(x, y)| y >= x));
            }
        }
    }

    #[test]
    fn test_icu_overflow_only_above_capacity() {
        let mut scenario = single_group_scenario();
        scenario.r0 = 3.5;
        scenario.initial_number_of_cases = 1_000;
        scenario.simulation_time_range = DateRange::new(date("2020-03-01"), date("2020-08-01"));

        scenario.icu_beds = 1e9;
        let roomy = run(&scenario);
        assert!(roomy.iter().all(|p| p.current.overflow.sum() == 0.0));

        scenario.icu_beds = 100.0;
        let scarce = run(&scenario);
        assert!(scarce.iter().any(|p| p.current.overflow.sum() > 0.0));
        for point in &scarce {
            assert!(point.current.critical.sum() <= 100.0 + 1e-6);
        }
        let deaths = |d: &[SimulationTimePoint]| d.last().unwrap().current.fatal.sum();
        assert!(deaths(&scarce) > deaths(&roomy));
    }

    #[test]
    fn test_mitigation_slows_transmission() {
        let baseline = single_group_scenario();
        let mut mitigated = baseline.clone();
        mitigated.mitigation_intervals.push(MitigationInterval {
            name: "lockdown".to_string(),
            time_range: DateRange::new(date("2020-03-10"), date("2020-04-30")),
            transmission_reduction: NumberRange::new(60.0, 60.0),
        });
        let infected = |d: Vec<SimulationTimePoint>| {
            let last = d.last().unwrap();
            last.current.active().sum() + last.cumulative.recovered.sum()
        };
        assert!(infected(run(&mitigated)) < infected(run(&baseline)));
    }

    #[test]
    fn test_transform_hook_applies_to_outflows() {
        let scenario = single_group_scenario();
        let params = params_for(&scenario);
        let seed = seed_for(&scenario);
        let frozen = evolve(&seed, &params, date("2020-03-02"), |_| 0.0).unwrap();
        assert_eq!(frozen.current, seed.current);
    }

    #[test]
    fn test_nan_fails_fast() {
        let scenario = single_group_scenario();
        let params = params_for(&scenario);
        let seed = seed_for(&scenario);
        let result = evolve(&seed, &params, date("2020-03-02"), |_| f64::NAN);
        assert!(matches!(
            result,
            Err(EngineError::NumericalInstability { .. })
        ));

        let mut broken = params.clone();
        broken.infection.average = f64::INFINITY;
        let result = evolve(&seed, &broken, date("2020-03-02"), identity);
        assert!(matches!(
            result,
            Err(EngineError::NumericalInstability { .. })
        ));
    }

    #[test]
    fn test_step_must_move_forward() {
        let scenario = single_group_scenario();
        let seed = seed_for(&scenario);
        let result = evolve(&seed, &params_for(&scenario), seed.time, identity);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }
}
