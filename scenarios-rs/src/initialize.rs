use chrono::NaiveDate;
use nalgebra::DVector;

use crate::model_params::EXPOSED_STAGES;
use crate::parameters::{AgeDistribution, Scenario};
use crate::state::{CompartmentState, CumulativeState, SimulationTimePoint};

/// Share of initial cases placed directly into the infectious compartment. The
/// rest is spread evenly over the exposed sub-stages.
pub const INITIAL_INFECTIOUS_FRACTION: f64 = 0.3;

/// Builds the seed state at `t0`: population and initial cases distributed
/// over age groups by their population share, seroprevalent individuals
/// already recovered.
pub fn initialize_population(
    population_served: u64,
    initial_cases: u64,
    t0: NaiveDate,
    scenario: &Scenario,
    ages: &AgeDistribution,
) -> SimulationTimePoint {
    let weights = DVector::from_vec(ages.weights());
    let n = weights.len();
    let people = &weights * population_served as f64;
    let cases = &weights * initial_cases as f64;
    let immune = scenario.seroprevalence / 100.0;

    let mut current = CompartmentState::zeros(n);
    current.infectious = &cases * INITIAL_INFECTIOUS_FRACTION;
    let per_stage = &cases * ((1.0 - INITIAL_INFECTIOUS_FRACTION) / EXPOSED_STAGES as f64);
    current.exposed = vec![per_stage; EXPOSED_STAGES];
    current.recovered = people.zip_map(&cases, |p, c| (immune * p).min((p - c).max(0.0)));
    current.susceptible = DVector::from_fn(n, |a, _| {
        (people[a] - cases[a] - current.recovered[a]).max(0.0)
    });

    let mut cumulative = CumulativeState::zeros(n);
    cumulative.recovered = current.recovered.clone();

    SimulationTimePoint {
        time: t0,
        current,
        cumulative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::fixtures::*;

    #[test]
    fn test_cases_split_by_age_share() {
        let scenario = single_group_scenario();
        let ages = three_groups();
        let seed = initialize_population(1_000_000, 100, date("2020-03-01"), &scenario, &ages);

        assert_eq!(seed.time, date("2020-03-01"));
        let active = seed.current.active();
        assert!(f64::abs(active.sum() - 100.0) < 1e-9);
        assert!(f64::abs(active[0] - 40.0) < 1e-9);
        assert!(f64::abs(active[2] - 20.0) < 1e-9);
        assert!(f64::abs(seed.current.infectious.sum() - 30.0) < 1e-9);
        assert_eq!(seed.current.severe.sum(), 0.0);
        assert_eq!(seed.current.fatal.sum(), 0.0);
        assert!(f64::abs(seed.current.population().sum() - 1_000_000.0) < 1e-6);
    }

    #[test]
    fn test_seroprevalence_starts_recovered() {
        let mut scenario = single_group_scenario();
        scenario.seroprevalence = 10.0;
        let seed =
            initialize_population(1_000_000, 10, date("2020-03-01"), &scenario, &single_group());

        assert!(f64::abs(seed.current.recovered[0] - 100_000.0) < 1e-6);
        assert_eq!(seed.cumulative.recovered, seed.current.recovered);
        assert!(f64::abs(seed.current.susceptible[0] - 899_990.0) < 1e-6);
        assert_eq!(seed.cumulative.fatality.sum(), 0.0);
    }

    #[test]
    fn test_zero_cases() {
        let scenario = single_group_scenario();
        let seed = initialize_population(1_000, 0, date("2020-03-01"), &scenario, &three_groups());
        assert_eq!(seed.current.active().sum(), 0.0);
        assert!(f64::abs(seed.current.susceptible.sum() - 1_000.0) < 1e-9);
    }
}
