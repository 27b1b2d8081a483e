//! # HMM Spectral Eval
//!
//! Evaluates how well a spectrally learned estimator approximates the
//! sequence-probability function of a known reference hidden Markov model,
//! optionally alongside a Baum-Welch (EM) baseline.
//!
//! ## Pipeline
//!
//! ```text
//! Train / test CSV (one sequence of symbol codes per line)
//!        ↓
//! Reference HMM artifact (JSON / YAML)
//!        ↓
//! Estimator training (spectral, optional EM)
//!        ↓
//! Per-sequence probability comparison
//!        ↓
//! Divergence analysis (pointwise KL, mean absolute error, paired t-test)
//!        ↓
//! Deterministic text report (+ optional JSON)
//! ```

pub mod comparator;
pub mod config;
pub mod dataset;
pub mod estimator;
pub mod hmm;
pub mod metrics;
pub mod report;
pub mod runner;

pub use comparator::{compare, CompareError, EvaluationRecord};
pub use config::{
    ConfigError, EmSettings, EvalConfig, ReportSettings, SpectralSettings, StatSettings,
};
pub use dataset::{Dataset, DatasetError, DatasetStats, ObservationSequence};
pub use estimator::{
    BaumWelch, Estimator, EstimatorError, EstimatorState, Hyperparameter, SpectralLearner,
};
pub use hmm::{DiscreteHmm, ModelArtifact, ModelError, ReferenceModel};
pub use metrics::{
    analyze, kl_divergence, paired_t_test, DivergenceError, DivergenceSummary, ErrorComparison,
    EstimatorSummary, SignificanceResult,
};
pub use report::{sci, EstimatorInfo, Evaluation, ReportError};
pub use runner::{EvaluationRunner, Phase, RunnerError};
