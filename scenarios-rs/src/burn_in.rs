//! Burn-in equilibration.
//!
//! Freshly seeded cases are spread over age groups by population share, which
//! is far from the age structure the epidemic settles into. The seed is run
//! forward for a few weeks and the resulting shape is rescaled back to the
//! requested number of cases at the original start date.

use chrono::{Days, NaiveDate};

use crate::error::{EngineError, Result};
use crate::initialize::initialize_population;
use crate::model::{identity, simulate};
use crate::model_params::ModelParams;
use crate::parameters::{AgeDistribution, Scenario};
use crate::state::{CompartmentState, SimulationTimePoint};

pub const BURN_IN_DAYS: u64 = 21;

/// Returns the seed state at `t0` whose infected compartments carry the
/// burned-in age and stage structure, scaled to exactly `initial_cases`.
///
/// With zero initial cases there is nothing to equilibrate and the plain seed
/// is returned.
pub fn burn_in(
    initial_cases: u64,
    t0: NaiveDate,
    scenario: &Scenario,
    params: &ModelParams,
    ages: &AgeDistribution,
) -> Result<SimulationTimePoint> {
    let seed = initialize_population(params.population_served, initial_cases, t0, scenario, ages);
    if initial_cases == 0 {
        log::debug!("no initial cases, skipping burn-in");
        return Ok(seed);
    }

    let end = t0
        .checked_add_days(Days::new(BURN_IN_DAYS))
        .ok_or_else(|| EngineError::numerical(t0, "burn-in end date out of range"))?;
    let trajectory = simulate(seed.clone(), params, end, identity)?;
    let burned = match trajectory.last() {
        Some(point) => &point.current,
        None => return Err(EngineError::numerical(t0, "burn-in produced no time points")),
    };

    let total = burned.active().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(EngineError::numerical(
            end,
            format!(
                "burn-in left {total} active cases, cannot rescale to {initial_cases} (R0 = {})",
                params.r0
            ),
        ));
    }
    let factor = initial_cases as f64 / total;
    log::debug!("burn-in rescale factor {factor:.6} after {BURN_IN_DAYS} days");

    Ok(rescaled(&seed, burned, factor))
}

/// New state at the seed's time: infected compartments from `burned` times
/// `factor`; susceptible recomputed so every age group keeps its seed size.
fn rescaled(
    seed: &SimulationTimePoint,
    burned: &CompartmentState,
    factor: f64,
) -> SimulationTimePoint {
    let people = seed.current.population();
    let mut current = CompartmentState {
        susceptible: seed.current.susceptible.clone(),
        exposed: burned.exposed.iter().map(|stage| stage * factor).collect(),
        infectious: &burned.infectious * factor,
        severe: &burned.severe * factor,
        critical: &burned.critical * factor,
        overflow: &burned.overflow * factor,
        recovered: seed.current.recovered.clone(),
        fatal: seed.current.fatal.clone(),
    };
    let others = current.active() + &current.recovered + &current.fatal;
    current.susceptible = people.zip_map(&others, |p, o| (p - o).max(0.0));

    SimulationTimePoint {
        time: seed.time,
        current,
        cumulative: seed.cumulative.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_params::{Sampling, derive_model_params};
    use crate::parameters::fixtures::*;

    fn params(scenario: &Scenario) -> ModelParams {
        derive_model_params(
            scenario,
            &three_group_severity(),
            &three_groups(),
            Sampling::Deterministic,
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn test_burn_in_matches_case_count() {
        for (population, cases) in [(1_000_000u64, 10u64), (50_000, 1), (10_000_000, 25_000)] {
            let mut scenario = single_group_scenario();
            scenario.population_served = population;
            scenario.initial_number_of_cases = cases;
            let t0 = scenario.simulation_time_range.begin;
            let state = burn_in(cases, t0, &scenario, &params(&scenario), &three_groups()).unwrap();

            assert_eq!(state.time, t0);
            let active = state.current.active().sum();
            assert!(
                f64::abs(active - cases as f64) / (cases as f64) < 1e-6,
                "{active} != {cases}"
            );
            assert!(f64::abs(state.current.population().sum() - population as f64) < 1e-3);
        }
    }

    #[test]
    fn test_burn_in_changes_age_shape() {
        let scenario = single_group_scenario();
        let t0 = scenario.simulation_time_range.begin;
        let ages = three_groups();
        let seed = initialize_population(1_000_000, 10, t0, &scenario, &ages);
        let state = burn_in(10, t0, &scenario, &params(&scenario), &ages).unwrap();

        // the seed splits cases by population share; after burn-in the
        // epidemic carries severe cases and a different stage mix
        assert!(state.current.severe.sum() > 0.0);
        assert_ne!(state.current.exposed, seed.current.exposed);
        assert!(state.min_value() >= 0.0);
    }

    #[test]
    fn test_zero_cases_returns_seed() {
        let mut scenario = single_group_scenario();
        scenario.initial_number_of_cases = 0;
        let t0 = scenario.simulation_time_range.begin;
        let ages = three_groups();
        let state = burn_in(0, t0, &scenario, &params(&scenario), &ages).unwrap();
        let seed = initialize_population(1_000_000, 0, t0, &scenario, &ages);
        assert_eq!(state, seed);
    }

    #[test]
    fn test_extinct_burn_in_is_an_error() {
        let scenario = single_group_scenario();
        let t0 = scenario.simulation_time_range.begin;
        let mut p = params(&scenario);
        // everyone infected leaves the active compartments straight away and
        // nobody new gets infected
        p.infection.average = 0.0;
        p.rate.latency = 1e9;
        p.rate.recovery = p.rate.recovery.map(|_| 1e9);
        p.rate.severe = p.rate.severe.map(|_| 0.0);
        let result = burn_in(10, t0, &scenario, &p, &three_groups());
        assert!(matches!(
            result,
            Err(EngineError::NumericalInstability { .. })
        ));
    }
}
