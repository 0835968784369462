//! Scenario input schema.
//!
//! Everything the engine consumes is deserialized into these types and checked
//! by the `validate` routines before any derivation happens. The core never
//! sees unvalidated data.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Number of sampled parameter sets when the scenario does not say otherwise.
pub const DEFAULT_ENSEMBLE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumberRange {
    pub begin: f64,
    pub end: f64,
}

impl NumberRange {
    pub fn new(begin: f64, end: f64) -> Self {
        NumberRange { begin, end }
    }

    pub fn is_degenerate(&self) -> bool {
        self.begin == self.end
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.begin + self.end)
    }

    fn check(&self, what: &str, min: f64, max: f64) -> Result<()> {
        if !self.begin.is_finite() || !self.end.is_finite() {
            return Err(EngineError::config(format!("{what} must be finite")));
        }
        if self.begin > self.end {
            return Err(EngineError::config(format!(
                "{what} range is reversed ({} > {})",
                self.begin, self.end
            )));
        }
        if self.begin < min || self.end > max {
            return Err(EngineError::config(format!(
                "{what} range [{}, {}] outside [{min}, {max}]",
                self.begin, self.end
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(begin: NaiveDate, end: NaiveDate) -> Self {
        DateRange { begin, end }
    }

    /// Both ends inclusive.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.begin <= date && date <= self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.begin).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationInterval {
    #[serde(default)]
    pub name: String,
    pub time_range: DateRange,
    /// Percent reduction of transmission while the interval is active.
    pub transmission_reduction: NumberRange,
}

/// Flattened scenario: population, epidemiology, mitigation and simulation
/// settings in one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub population_served: u64,
    pub age_distribution_name: String,
    pub initial_number_of_cases: u64,
    #[serde(default)]
    pub imports_per_day: f64,
    pub icu_beds: f64,
    /// Percent of the population already immune at the start.
    #[serde(default)]
    pub seroprevalence: f64,

    pub r0: f64,
    #[serde(default)]
    pub r0_bounds: Option<NumberRange>,
    pub latency_days: f64,
    pub infectious_period_days: f64,
    #[serde(default)]
    pub seasonal_forcing: f64,
    /// 0 = January.
    #[serde(default)]
    pub peak_month: u32,
    pub hospital_stay_days: f64,
    pub icu_stay_days: f64,
    #[serde(default = "default_overflow_severity")]
    pub overflow_severity: f64,

    #[serde(default)]
    pub mitigation_intervals: Vec<MitigationInterval>,

    pub simulation_time_range: DateRange,
    #[serde(default = "default_number_stochastic_runs")]
    pub number_stochastic_runs: usize,
}

fn default_overflow_severity() -> f64 {
    2.0
}

fn default_number_stochastic_runs() -> usize {
    DEFAULT_ENSEMBLE_SIZE
}

fn positive_days(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "{name} must be a positive number of days, got {value}"
        )))
    }
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        if self.population_served == 0 {
            return Err(EngineError::config("population_served must be > 0"));
        }
        if self.initial_number_of_cases > self.population_served {
            return Err(EngineError::config(format!(
                "initial_number_of_cases ({}) exceeds population_served ({})",
                self.initial_number_of_cases, self.population_served
            )));
        }
        if !(self.imports_per_day.is_finite() && self.imports_per_day >= 0.0) {
            return Err(EngineError::config("imports_per_day must be >= 0"));
        }
        if !(self.icu_beds.is_finite() && self.icu_beds >= 0.0) {
            return Err(EngineError::config("icu_beds must be >= 0"));
        }
        if !(0.0..=100.0).contains(&self.seroprevalence) {
            return Err(EngineError::config(format!(
                "seroprevalence must be a percentage in [0, 100], got {}",
                self.seroprevalence
            )));
        }

        if !(self.r0.is_finite() && self.r0 >= 0.0) {
            return Err(EngineError::config(format!("r0 must be >= 0, got {}", self.r0)));
        }
        if let Some(bounds) = &self.r0_bounds {
            bounds.check("r0_bounds", 0.0, f64::INFINITY)?;
            if self.r0 < bounds.begin || self.r0 > bounds.end {
                log::warn!(
                    "r0 point value {} lies outside its plausible bounds [{}, {}]",
                    self.r0,
                    bounds.begin,
                    bounds.end
                );
            }
        }
        positive_days("latency_days", self.latency_days)?;
        positive_days("infectious_period_days", self.infectious_period_days)?;
        positive_days("hospital_stay_days", self.hospital_stay_days)?;
        positive_days("icu_stay_days", self.icu_stay_days)?;
        if !(0.0..=1.0).contains(&self.seasonal_forcing) {
            return Err(EngineError::config(format!(
                "seasonal_forcing must be in [0, 1], got {}",
                self.seasonal_forcing
            )));
        }
        if self.peak_month > 11 {
            return Err(EngineError::config(format!(
                "peak_month must be in 0..=11, got {}",
                self.peak_month
            )));
        }
        if !(self.overflow_severity.is_finite() && self.overflow_severity >= 1.0) {
            return Err(EngineError::config(format!(
                "overflow_severity must be >= 1, got {}",
                self.overflow_severity
            )));
        }

        for interval in &self.mitigation_intervals {
            if interval.time_range.begin > interval.time_range.end {
                return Err(EngineError::config(format!(
                    "mitigation interval '{}' ends before it begins",
                    interval.name
                )));
            }
            interval.transmission_reduction.check(
                &format!("transmission_reduction of '{}'", interval.name),
                0.0,
                100.0,
            )?;
        }

        if self.simulation_time_range.begin >= self.simulation_time_range.end {
            return Err(EngineError::config(format!(
                "simulation_time_range is not increasing ({} .. {})",
                self.simulation_time_range.begin, self.simulation_time_range.end
            )));
        }
        if self.number_stochastic_runs == 0 {
            return Err(EngineError::config("number_stochastic_runs must be >= 1"));
        }
        Ok(())
    }

    /// Uncertainty sampling is requested when R0 or any mitigation strength is
    /// given as a non-degenerate range.
    pub fn has_uncertainty(&self) -> bool {
        self.r0_bounds.is_some_and(|b| !b.is_degenerate())
            || self
                .mitigation_intervals
                .iter()
                .any(|m| !m.transmission_reduction.is_degenerate())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgeGroup(pub String);

impl From<&str> for AgeGroup {
    fn from(s: &str) -> Self {
        AgeGroup(s.to_string())
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeDistributionDatum {
    pub age_group: AgeGroup,
    pub population: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeDistribution {
    pub name: String,
    pub data: Vec<AgeDistributionDatum>,
}

impl AgeDistribution {
    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(EngineError::config(format!(
                "age distribution '{}' has no age groups",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for datum in &self.data {
            if !seen.insert(&datum.age_group) {
                return Err(EngineError::config(format!(
                    "age group '{}' appears twice in age distribution '{}'",
                    datum.age_group, self.name
                )));
            }
        }
        if self.total() == 0 {
            return Err(EngineError::config(format!(
                "age distribution '{}' has zero total population",
                self.name
            )));
        }
        Ok(())
    }

    pub fn age_groups(&self) -> impl Iterator<Item = &AgeGroup> {
        self.data.iter().map(|d| &d.age_group)
    }

    pub fn total(&self) -> u64 {
        self.data.iter().map(|d| d.population).sum()
    }

    /// Population share of every age group, in table order.
    pub fn weights(&self) -> Vec<f64> {
        let total = self.total() as f64;
        self.data
            .iter()
            .map(|d| d.population as f64 / total)
            .collect()
    }
}

const BUNDLED_AGE_DISTRIBUTIONS: &str = include_str!("../data/age_distribution.json");

/// An age-distribution file holds either one distribution or a named catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AgeDistributionSource {
    Catalog { all: Vec<AgeDistribution> },
    Single(AgeDistribution),
}

impl AgeDistributionSource {
    /// Catalog used when no age-distribution file is given.
    pub fn bundled() -> Result<Self> {
        serde_json::from_str(BUNDLED_AGE_DISTRIBUTIONS)
            .map_err(|e| EngineError::config(format!("bundled age distributions: {e}")))
    }

    pub fn select(self, name: &str) -> Result<AgeDistribution> {
        match self {
            AgeDistributionSource::Catalog { all } => all
                .into_iter()
                .find(|d| d.name == name)
                .ok_or_else(|| {
                    EngineError::config(format!("age distribution '{name}' not found"))
                }),
            AgeDistributionSource::Single(distribution) => {
                if distribution.name != name {
                    log::warn!(
                        "using age distribution '{}' from file, scenario asks for '{name}'",
                        distribution.name
                    );
                }
                Ok(distribution)
            }
        }
    }
}

/// Severity of infection for one age group. All values are fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityDatum {
    pub age_group: AgeGroup,
    /// Share of infections that are confirmed cases
    pub confirmed: f64,
    /// Share of confirmed cases needing hospital care
    pub severe: f64,
    /// Share of hospitalized cases needing intensive care
    pub critical: f64,
    /// Share of critical cases that die
    pub fatal: f64,
    /// Share of infectious individuals isolated from transmission
    #[serde(default)]
    pub isolated: f64,
}

impl SeverityDatum {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("confirmed", self.confirmed),
            ("severe", self.severe),
            ("critical", self.critical),
            ("fatal", self.fatal),
            ("isolated", self.isolated),
        ];
        for (field, value) in fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::config(format!(
                    "severity '{field}' for age group '{}' must be in [0, 1], got {value}",
                    self.age_group
                )));
            }
        }
        Ok(())
    }
}

const BUNDLED_SEVERITY: &str = include_str!("../data/severity.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityTable {
    #[serde(default)]
    pub name: String,
    pub data: Vec<SeverityDatum>,
}

impl SeverityTable {
    /// Default table for the standard ten-year age brackets.
    pub fn bundled() -> Result<Self> {
        serde_json::from_str(BUNDLED_SEVERITY)
            .map_err(|e| EngineError::config(format!("bundled severity table: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// One million people in a single age group, no mitigation.
    pub fn single_group_scenario() -> Scenario {
        Scenario {
            population_served: 1_000_000,
            age_distribution_name: "single".to_string(),
            initial_number_of_cases: 10,
            imports_per_day: 0.0,
            icu_beds: 1_000.0,
            seroprevalence: 0.0,
            r0: 2.2,
            r0_bounds: None,
            latency_days: 5.0,
            infectious_period_days: 3.0,
            seasonal_forcing: 0.0,
            peak_month: 0,
            hospital_stay_days: 4.0,
            icu_stay_days: 14.0,
            overflow_severity: 2.0,
            mitigation_intervals: vec![],
            simulation_time_range: DateRange::new(date("2020-03-01"), date("2020-04-30")),
            number_stochastic_runs: DEFAULT_ENSEMBLE_SIZE,
        }
    }

    pub fn single_group() -> AgeDistribution {
        AgeDistribution {
            name: "single".to_string(),
            data: vec![AgeDistributionDatum {
                age_group: "all".into(),
                population: 1_000_000,
            }],
        }
    }

    pub fn single_group_severity() -> Vec<SeverityDatum> {
        vec![SeverityDatum {
            age_group: "all".into(),
            confirmed: 0.3,
            severe: 0.1,
            critical: 0.25,
            fatal: 0.4,
            isolated: 0.0,
        }]
    }

    pub fn three_groups() -> AgeDistribution {
        AgeDistribution {
            name: "three".to_string(),
            data: vec![
                AgeDistributionDatum {
                    age_group: "0-29".into(),
                    population: 400_000,
                },
                AgeDistributionDatum {
                    age_group: "30-59".into(),
                    population: 400_000,
                },
                AgeDistributionDatum {
                    age_group: "60+".into(),
                    population: 200_000,
                },
            ],
        }
    }

    pub fn three_group_severity() -> Vec<SeverityDatum> {
        vec![
            SeverityDatum {
                age_group: "0-29".into(),
                confirmed: 0.1,
                severe: 0.03,
                critical: 0.1,
                fatal: 0.3,
                isolated: 0.0,
            },
            SeverityDatum {
                age_group: "30-59".into(),
                confirmed: 0.2,
                severe: 0.08,
                critical: 0.2,
                fatal: 0.35,
                isolated: 0.0,
            },
            SeverityDatum {
                age_group: "60+".into(),
                confirmed: 0.4,
                severe: 0.3,
                critical: 0.4,
                fatal: 0.5,
                isolated: 0.0,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_with_defaults() {
        let data = json!({
            "population_served": 1000,
            "age_distribution_name": "single",
            "initial_number_of_cases": 1,
            "icu_beds": 10.0,
            "r0": 2.0,
            "latency_days": 3.0,
            "infectious_period_days": 3.0,
            "hospital_stay_days": 4.0,
            "icu_stay_days": 14.0,
            "simulation_time_range": { "begin": "2020-03-01", "end": "2020-06-01" }
        });
        let scenario: Scenario = serde_json::from_value(data).unwrap();
        assert_eq!(scenario.number_stochastic_runs, DEFAULT_ENSEMBLE_SIZE);
        assert_eq!(scenario.overflow_severity, 2.0);
        assert_eq!(scenario.seroprevalence, 0.0);
        assert!(scenario.mitigation_intervals.is_empty());
        assert_eq!(scenario.simulation_time_range.begin, date("2020-03-01"));
        assert!(scenario.validate().is_ok());
        assert!(!scenario.has_uncertainty());
    }

    #[test]
    fn test_reversed_time_range_rejected() {
        let mut scenario = single_group_scenario();
        scenario.simulation_time_range = DateRange::new(date("2020-05-01"), date("2020-05-01"));
        assert!(matches!(
            scenario.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut scenario = single_group_scenario();
        scenario.infectious_period_days = 0.0;
        assert!(scenario.validate().is_err());

        let mut scenario = single_group_scenario();
        scenario.seroprevalence = 120.0;
        assert!(scenario.validate().is_err());

        let mut scenario = single_group_scenario();
        scenario.r0_bounds = Some(NumberRange::new(3.0, 2.0));
        assert!(scenario.validate().is_err());

        let mut scenario = single_group_scenario();
        scenario.mitigation_intervals.push(MitigationInterval {
            name: "lockdown".to_string(),
            time_range: DateRange::new(date("2020-03-10"), date("2020-04-10")),
            transmission_reduction: NumberRange::new(40.0, 140.0),
        });
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_has_uncertainty() {
        let mut scenario = single_group_scenario();
        scenario.r0_bounds = Some(NumberRange::new(2.2, 2.2));
        assert!(!scenario.has_uncertainty());

        scenario.r0_bounds = Some(NumberRange::new(1.8, 2.6));
        assert!(scenario.has_uncertainty());

        scenario.r0_bounds = None;
        scenario.mitigation_intervals.push(MitigationInterval {
            name: "schools".to_string(),
            time_range: DateRange::new(date("2020-03-10"), date("2020-04-10")),
            transmission_reduction: NumberRange::new(20.0, 30.0),
        });
        assert!(scenario.has_uncertainty());
    }

    #[test]
    fn test_age_distribution_weights() {
        let ages = three_groups();
        assert!(ages.validate().is_ok());
        assert_eq!(ages.weights(), vec![0.4, 0.4, 0.2]);
    }

    #[test]
    fn test_duplicate_age_group_rejected() {
        let mut ages = three_groups();
        ages.data[2].age_group = "0-29".into();
        assert!(ages.validate().is_err());
    }

    #[test]
    fn test_select_from_catalog() {
        let source: AgeDistributionSource = serde_json::from_value(json!({
            "all": [
                { "name": "A", "data": [{ "age_group": "all", "population": 10 }] },
                { "name": "B", "data": [{ "age_group": "all", "population": 20 }] }
            ]
        }))
        .unwrap();
        let selected = source.clone().select("B").unwrap();
        assert_eq!(selected.total(), 20);
        assert!(matches!(
            source.select("C"),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_bundled_age_distributions() {
        let demo = AgeDistributionSource::bundled().unwrap().select("Demo").unwrap();
        assert!(demo.validate().is_ok());
        assert_eq!(demo.data.len(), 9);
        assert_eq!(demo.total(), 1_000_000);

        // every bracket of the bundled severity table is covered
        let severity = SeverityTable::bundled().unwrap();
        let groups: Vec<&AgeGroup> = demo.age_groups().collect();
        assert!(severity.data.iter().all(|d| groups.contains(&&d.age_group)));

        assert!(matches!(
            AgeDistributionSource::bundled().unwrap().select("Atlantis"),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_bundled_severity() {
        let table = SeverityTable::bundled().unwrap();
        assert_eq!(table.data.len(), 9);
        assert_eq!(table.data[0].age_group, AgeGroup::from("0-9"));
        assert_eq!(table.data[8].age_group, AgeGroup::from("80+"));
        assert!(table.data.iter().all(|d| d.validate().is_ok()));
    }

    #[test]
    fn test_severity_fraction_out_of_range() {
        let mut severity = single_group_severity();
        assert!(severity[0].validate().is_ok());
        severity[0].fatal = 1.5;
        assert!(severity[0].validate().is_err());
    }
}
