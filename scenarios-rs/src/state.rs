use chrono::NaiveDate;
use nalgebra::DVector;

use crate::model_params::EXPOSED_STAGES;

/// Point-in-time occupancy of every compartment, one entry per age group.
#[derive(Debug, Clone, PartialEq)]
pub struct CompartmentState {
    pub susceptible: DVector<f64>,
    /// One vector per exposed sub-stage, in progression order
    pub exposed: Vec<DVector<f64>>,
    pub infectious: DVector<f64>,
    pub severe: DVector<f64>,
    pub critical: DVector<f64>,
    pub overflow: DVector<f64>,
    pub recovered: DVector<f64>,
    pub fatal: DVector<f64>,
}

impl CompartmentState {
    pub fn zeros(age_groups: usize) -> Self {
        let zero = DVector::zeros(age_groups);
        CompartmentState {
            susceptible: zero.clone(),
            exposed: vec![zero.clone(); EXPOSED_STAGES],
            infectious: zero.clone(),
            severe: zero.clone(),
            critical: zero.clone(),
            overflow: zero.clone(),
            recovered: zero.clone(),
            fatal: zero,
        }
    }

    pub fn age_groups(&self) -> usize {
        self.susceptible.len()
    }

    /// Exposed summed over sub-stages.
    pub fn exposed_total(&self) -> DVector<f64> {
        self.exposed
            .iter()
            .fold(DVector::zeros(self.age_groups()), |acc, stage| acc + stage)
    }

    /// Everyone currently infected or in care: exposed, infectious, severe,
    /// critical and overflow.
    pub fn active(&self) -> DVector<f64> {
        self.exposed_total() + &self.infectious + &self.severe + &self.critical + &self.overflow
    }

    /// Head count per age group across all compartments.
    pub fn population(&self) -> DVector<f64> {
        &self.susceptible + self.active() + &self.recovered + &self.fatal
    }

    pub fn vectors(&self) -> impl Iterator<Item = &DVector<f64>> {
        [&self.susceptible]
            .into_iter()
            .chain(self.exposed.iter())
            .chain([
                &self.infectious,
                &self.severe,
                &self.critical,
                &self.overflow,
                &self.recovered,
                &self.fatal,
            ])
    }

    pub fn is_finite(&self) -> bool {
        self.vectors().all(|v| v.iter().all(|x| x.is_finite()))
    }
}

/// Running totals since the start of the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeState {
    pub recovered: DVector<f64>,
    /// Entries into hospital care
    pub hospitalized: DVector<f64>,
    /// Entries into critical care, admitted or overflowing
    pub critical: DVector<f64>,
    pub fatality: DVector<f64>,
}

impl CumulativeState {
    pub fn zeros(age_groups: usize) -> Self {
        let zero = DVector::zeros(age_groups);
        CumulativeState {
            recovered: zero.clone(),
            hospitalized: zero.clone(),
            critical: zero.clone(),
            fatality: zero,
        }
    }

    pub fn vectors(&self) -> impl Iterator<Item = &DVector<f64>> {
        [
            &self.recovered,
            &self.hospitalized,
            &self.critical,
            &self.fatality,
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTimePoint {
    pub time: NaiveDate,
    pub current: CompartmentState,
    pub cumulative: CumulativeState,
}

impl SimulationTimePoint {
    pub fn is_finite(&self) -> bool {
        self.current.is_finite()
            && self
                .cumulative
                .vectors()
                .all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Smallest value held anywhere in the state.
    pub fn min_value(&self) -> f64 {
        self.current
            .vectors()
            .chain(self.cumulative.vectors())
            .flat_map(|v| v.iter().copied())
            .fold(f64::INFINITY, f64::min)
    }
}
