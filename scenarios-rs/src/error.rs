//! Errors raised by the scenario engine.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or inconsistent scenario, age-distribution or severity input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Degenerate numerical state (non-finite rates, empty burn-in, NaN states)
    #[error("Numerical instability on {date}: {message}")]
    NumericalInstability { date: NaiveDate, message: String },

    /// A single ensemble member failed; the whole run fails with it
    #[error("Ensemble member {index} (R0 = {r0:.3}) failed: {source}")]
    EnsembleMember {
        index: usize,
        r0: f64,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn numerical(date: NaiveDate, message: impl Into<String>) -> Self {
        EngineError::NumericalInstability {
            date,
            message: message.into(),
        }
    }

    pub fn member(index: usize, r0: f64, source: EngineError) -> Self {
        EngineError::EnsembleMember {
            index,
            r0,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
