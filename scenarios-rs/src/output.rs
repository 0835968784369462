use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::results::ExportedTimePoint;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    pub lower: Vec<ExportedTimePoint>,
    pub middle: Vec<ExportedTimePoint>,
    pub upper: Vec<ExportedTimePoint>,
}

pub const CSV_HEADERS: [&str; 14] = [
    "time",
    "band",
    "susceptible",
    "exposed",
    "infectious",
    "severe",
    "critical",
    "overflow",
    "recovered",
    "fatality",
    "cumulative_recovered",
    "cumulative_hospitalized",
    "cumulative_critical",
    "cumulative_fatality",
];

impl Trajectory {
    /// Every time point of every band, one row each, matching `CSV_HEADERS`.
    pub fn csv_rows(&self) -> Vec<Vec<String>> {
        [
            ("lower", &self.lower),
            ("middle", &self.middle),
            ("upper", &self.upper),
        ]
        .into_iter()
        .flat_map(|(band, points)| {
            points.iter().map(move |p| {
                let c = &p.current;
                let cum = &p.cumulative;
                let values = [
                    c.susceptible,
                    c.exposed,
                    c.infectious,
                    c.severe,
                    c.critical,
                    c.overflow,
                    c.recovered,
                    c.fatality,
                    cum.recovered,
                    cum.hospitalized,
                    cum.critical,
                    cum.fatality,
                ];
                [p.time.to_string(), band.to_string()]
                    .into_iter()
                    .chain(values.iter().map(|v| v.to_string()))
                    .collect()
            })
        })
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeValue {
    pub t: NaiveDate,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReproductionNumber {
    pub mean: Vec<TimeValue>,
    pub lower: Vec<TimeValue>,
    pub upper: Vec<TimeValue>,
}

type Series = (&'static str, fn(&ExportedTimePoint) -> f64);

const PLOTTED_SERIES: [Series; 8] = [
    ("susceptible", |p| p.current.susceptible),
    ("infectious", |p| p.current.infectious),
    ("severe", |p| p.current.severe),
    ("critical", |p| p.current.critical),
    ("overflow", |p| p.current.overflow),
    ("recovered", |p| p.current.recovered),
    ("fatality", |p| p.current.fatality),
    ("cumulativeHospitalized", |p| p.cumulative.hospitalized),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotPoint {
    pub t: NaiveDate,
    /// Middle trajectory value of every plotted series
    pub lines: BTreeMap<&'static str, f64>,
    /// `[lower, upper]` band of every plotted series
    pub areas: BTreeMap<&'static str, [f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    pub points: Vec<PlotPoint>,
}

/// Presentation-oriented view of a trajectory; depends on nothing else.
pub fn prepare_plot_data(trajectory: &Trajectory) -> PlotData {
    let points = trajectory
        .middle
        .iter()
        .zip(&trajectory.lower)
        .zip(&trajectory.upper)
        .map(|((middle, lower), upper)| PlotPoint {
            t: middle.time,
            lines: PLOTTED_SERIES
                .iter()
                .map(|(name, value)| (*name, value(middle)))
                .collect(),
            areas: PLOTTED_SERIES
                .iter()
                .map(|(name, value)| (*name, [value(lower), value(upper)]))
                .collect(),
        })
        .collect();
    PlotData { points }
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmResult {
    pub trajectory: Trajectory,
    #[serde(rename = "R0")]
    pub r0: ReproductionNumber,
    pub plot_data: PlotData,
}
