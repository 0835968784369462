//! Reduction of age-stratified trajectories to totals, and nearest-rank
//! percentile bands across an ensemble of trajectories.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::state::SimulationTimePoint;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentTotals {
    pub susceptible: f64,
    pub exposed: f64,
    pub infectious: f64,
    pub severe: f64,
    pub critical: f64,
    pub overflow: f64,
    pub recovered: f64,
    pub fatality: f64,
}

impl CurrentTotals {
    fn to_array(self) -> [f64; 8] {
        [
            self.susceptible,
            self.exposed,
            self.infectious,
            self.severe,
            self.critical,
            self.overflow,
            self.recovered,
            self.fatality,
        ]
    }

    fn from_array(a: [f64; 8]) -> Self {
        let [susceptible, exposed, infectious, severe, critical, overflow, recovered, fatality] = a;
        CurrentTotals {
            susceptible,
            exposed,
            infectious,
            severe,
            critical,
            overflow,
            recovered,
            fatality,
        }
    }

    /// Infected or in care: exposed, infectious, severe, critical, overflow.
    pub fn active(&self) -> f64 {
        self.exposed + self.infectious + self.severe + self.critical + self.overflow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CumulativeTotals {
    pub recovered: f64,
    pub hospitalized: f64,
    pub critical: f64,
    pub fatality: f64,
}

impl CumulativeTotals {
    fn to_array(self) -> [f64; 4] {
        [self.recovered, self.hospitalized, self.critical, self.fatality]
    }

    fn from_array(a: [f64; 4]) -> Self {
        let [recovered, hospitalized, critical, fatality] = a;
        CumulativeTotals {
            recovered,
            hospitalized,
            critical,
            fatality,
        }
    }
}

/// One time point summed over all age groups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportedTimePoint {
    pub time: NaiveDate,
    pub current: CurrentTotals,
    pub cumulative: CumulativeTotals,
}

pub fn collect_totals(dynamics: &[SimulationTimePoint]) -> Vec<ExportedTimePoint> {
    dynamics
        .iter()
        .map(|point| {
            let now = &point.current;
            let cumulative = &point.cumulative;
            ExportedTimePoint {
                time: point.time,
                current: CurrentTotals {
                    susceptible: now.susceptible.sum(),
                    exposed: now.exposed_total().sum(),
                    infectious: now.infectious.sum(),
                    severe: now.severe.sum(),
                    critical: now.critical.sum(),
                    overflow: now.overflow.sum(),
                    recovered: now.recovered.sum(),
                    fatality: now.fatal.sum(),
                },
                cumulative: CumulativeTotals {
                    recovered: cumulative.recovered.sum(),
                    hospitalized: cumulative.hospitalized.sum(),
                    critical: cumulative.critical.sum(),
                    fatality: cumulative.fatality.sum(),
                },
            }
        })
        .collect()
}

/// Index of the nearest-rank `percentile` in a sorted ensemble of `members`.
pub fn nearest_rank(members: usize, percentile: f64) -> usize {
    (members.saturating_sub(1) as f64 * percentile).ceil() as usize
}

fn column_percentile<const N: usize>(rows: &[[f64; N]], rank: usize) -> [f64; N] {
    std::array::from_fn(|k| {
        let mut column: Vec<f64> = rows.iter().map(|row| row[k]).collect();
        column.sort_by(f64::total_cmp);
        column[rank]
    })
}

/// Percentile band across `trajectories`, taken independently for every field
/// at every time index. Members must share the same time axis.
pub fn percentile_trajectory(
    trajectories: &[Vec<ExportedTimePoint>],
    percentile: f64,
) -> Result<Vec<ExportedTimePoint>> {
    if !(0.0..=1.0).contains(&percentile) {
        return Err(EngineError::config(format!(
            "percentile must be in [0, 1], got {percentile}"
        )));
    }
    let Some(first) = trajectories.first() else {
        return Err(EngineError::config("cannot take percentiles of an empty ensemble"));
    };
    if let Some(i) = trajectories.iter().position(|t| {
        t.len() != first.len() || t.iter().zip(first).any(|(a, b)| a.time != b.time)
    }) {
        return Err(EngineError::config(format!(
            "ensemble member {i} does not share the time axis of member 0"
        )));
    }

    let rank = nearest_rank(trajectories.len(), percentile);
    let band = (0..first.len())
        .map(|i| {
            let current: Vec<[f64; 8]> =
                trajectories.iter().map(|t| t[i].current.to_array()).collect();
            let cumulative: Vec<[f64; 4]> =
                trajectories.iter().map(|t| t[i].cumulative.to_array()).collect();
            ExportedTimePoint {
                time: first[i].time,
                current: CurrentTotals::from_array(column_percentile(&current, rank)),
                cumulative: CumulativeTotals::from_array(column_percentile(&cumulative, rank)),
            }
        })
        .collect();
    Ok(band)
}
