//! Estimators of sequence probabilities trained from observation data.
//!
//! Every estimator exposes the same capability set through [`Estimator`], so
//! the runner can drive any number of them without special-casing. Trained
//! parameters live inside an explicit [`Training`] state that is checked on
//! every prediction.

mod baum_welch;
mod spectral;

pub use baum_welch::BaumWelch;
pub use spectral::SpectralLearner;

use crate::dataset::{Dataset, ObservationSequence};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while training or querying an estimator
#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Estimator `{0}` must be trained before predicting")]
    Untrained(String),

    #[error("Not enough training data: {0}")]
    InsufficientData(String),

    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),
}

/// Lifecycle state of an estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorState {
    /// No parameters learned yet
    Untrained,
    /// Parameters learned; predictions allowed
    Trained,
}

impl fmt::Display for EstimatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untrained => f.write_str("untrained"),
            Self::Trained => f.write_str("trained"),
        }
    }
}

/// Learned parameters guarded by the estimator state
#[derive(Debug, Clone, Default)]
pub enum Training<P> {
    /// Nothing learned yet
    #[default]
    Untrained,
    /// Parameters from the most recent training run
    Trained(P),
}

impl<P> Training<P> {
    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> EstimatorState {
        match self {
            Self::Untrained => EstimatorState::Untrained,
            Self::Trained(_) => EstimatorState::Trained,
        }
    }

    /// Learned parameters of `estimator`
    ///
    /// # Errors
    ///
    /// Returns `EstimatorError::Untrained` if no training run has completed.
    pub fn params(&self, estimator: &str) -> Result<&P, EstimatorError> {
        match self {
            Self::Trained(params) => Ok(params),
            Self::Untrained => Err(EstimatorError::Untrained(estimator.to_string())),
        }
    }
}

/// A named hyperparameter value surfaced in reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hyperparameter {
    /// Parameter name, e.g. `rank`
    pub name: &'static str,
    /// Rendered value
    pub value: String,
}

impl Hyperparameter {
    /// Create a hyperparameter entry
    #[must_use]
    pub fn new(name: &'static str, value: impl ToString) -> Self {
        Self {
            name,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for Hyperparameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Sequence-probability estimator trained from a dataset
///
/// `train` takes `&mut self` and replaces any previously learned parameters
/// (a full retrain). `predict` takes `&self` and never mutates the estimator.
pub trait Estimator {
    /// Short identifier used in logs and report columns
    fn name(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> EstimatorState;

    /// Learn parameters from `dataset`, discarding earlier ones
    ///
    /// # Errors
    ///
    /// Returns an error if the data or hyperparameters cannot produce a model.
    /// On error the estimator keeps its previous state.
    fn train(&mut self, dataset: &Dataset) -> Result<(), EstimatorError>;

    /// Estimated probability of `sequence`
    ///
    /// # Errors
    ///
    /// Returns `EstimatorError::Untrained` before the first successful `train`.
    fn predict(&self, sequence: &ObservationSequence) -> Result<f64, EstimatorError>;

    /// Hyperparameters in a fixed order
    fn hyperparameters(&self) -> Vec<Hyperparameter>;
}
