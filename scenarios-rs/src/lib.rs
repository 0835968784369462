//! Age-stratified epidemic scenario engine.
//!
//! A scenario is seeded, burned in, and run forward one day at a time through
//! an SEIR-type model with hospital and ICU care. When R0 or mitigation
//! strength is uncertain an ensemble of sampled parameter sets is run as well
//! and reduced to percentile bands.

pub mod burn_in;
pub mod error;
pub mod initialize;
pub mod model;
pub mod model_params;
pub mod output;
pub mod parameters;
pub mod results;
pub mod run;
pub mod state;

pub use error::{EngineError, Result};
pub use output::AlgorithmResult;
pub use parameters::{
    AgeDistribution, AgeDistributionSource, Scenario, SeverityDatum, SeverityTable,
};
pub use run::{RunParams, run};
