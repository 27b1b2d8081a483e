//! Evaluation runner driving the load → train → compare → analyze → report
//! pipeline.
//!
//! [`EvaluationRunner`] owns the train/test datasets, the reference model and
//! the registered estimators, and enforces the phase order
//! `Uninitialized → DataLoaded → ModelLoaded → Trained → Evaluated`.

use crate::comparator::{compare, CompareError};
use crate::config::{ConfigError, EvalConfig};
use crate::dataset::{Dataset, DatasetError};
use crate::estimator::{BaumWelch, Estimator, EstimatorError, SpectralLearner};
use crate::hmm::{DiscreteHmm, ModelError, ReferenceModel};
use crate::metrics::{analyze, DivergenceError};
use crate::report::{EstimatorInfo, Evaluation, ReportError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur while running an evaluation
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to load {role} dataset from {}: {source}", .path.display())]
    Dataset {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: DatasetError,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Training estimator `{estimator}` failed: {source}")]
    Training {
        estimator: String,
        #[source]
        source: EstimatorError,
    },

    #[error(transparent)]
    Compare(#[from] CompareError),

    #[error("Divergence analysis failed: {0}")]
    Divergence(#[from] DivergenceError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot {operation} in phase {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("No estimator registered")]
    NoEstimator,
}

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Uninitialized,
    DataLoaded,
    ModelLoaded,
    Trained,
    Evaluated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::DataLoaded => "data-loaded",
            Self::ModelLoaded => "model-loaded",
            Self::Trained => "trained",
            Self::Evaluated => "evaluated",
        };
        f.write_str(name)
    }
}

/// Orchestrates one evaluation of estimators against a reference model
pub struct EvaluationRunner {
    train: Dataset,
    test: Dataset,
    reference: Option<Box<dyn ReferenceModel>>,
    estimators: Vec<Box<dyn Estimator>>,
    alpha: f64,
    json_output: Option<PathBuf>,
    phase: Phase,
    last_training_duration: Option<Duration>,
}

impl EvaluationRunner {
    /// Create a runner over already-parsed datasets
    #[must_use]
    pub fn new(train: Dataset, test: Dataset) -> Self {
        tracing::info!(train = train.len(), test = test.len(), "Datasets loaded");
        Self {
            train,
            test,
            reference: None,
            estimators: Vec::new(),
            alpha: EvalConfig::default().stats.alpha,
            json_output: None,
            phase: Phase::DataLoaded,
            last_training_duration: None,
        }
    }

    /// Create a runner over parsed datasets with estimators from `config`
    ///
    /// Registers the spectral learner as primary and, when `em.enabled`,
    /// the Baum-Welch estimator as secondary.
    #[must_use]
    pub fn from_config(train: Dataset, test: Dataset, config: &EvalConfig) -> Self {
        let mut runner = Self::new(train, test).with_alpha(config.stats.alpha);
        runner.json_output.clone_from(&config.report.json);
        runner.add_estimator(Box::new(SpectralLearner::new(config.spectral.rank)));
        if config.em.enabled {
            runner.add_estimator(Box::new(BaumWelch::new(config.em.clone())));
        }
        runner
    }

    /// Load both datasets from disk and configure estimators from `config`
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Dataset` naming the file that failed to load.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        train_path: P,
        test_path: Q,
        config: &EvalConfig,
    ) -> Result<Self, RunnerError> {
        let start = Instant::now();
        let train = load_dataset("training", train_path.as_ref())?;
        let test = load_dataset("testing", test_path.as_ref())?;
        tracing::info!(elapsed = ?start.elapsed(), "Time used to load data");
        Ok(Self::from_config(train, test, config))
    }

    /// Significance threshold for the estimator comparison
    #[must_use]
    pub const fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Also write a JSON rendering of each evaluation to `path`
    #[must_use]
    pub fn with_json_output<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.json_output = Some(path.into());
        self
    }

    /// Register an estimator; the first registered one is the primary
    ///
    /// A new estimator is untrained, so a trained runner drops back to
    /// `ModelLoaded` and must be trained again.
    pub fn add_estimator(&mut self, estimator: Box<dyn Estimator>) {
        tracing::debug!(estimator = estimator.name(), "Registered estimator");
        self.estimators.push(estimator);
        if self.phase > Phase::ModelLoaded {
            self.phase = Phase::ModelLoaded;
        }
    }

    /// Load and bind the reference HMM from a model artifact
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Model` if the artifact cannot be loaded.
    pub fn load_reference_model<P: AsRef<Path>>(&mut self, path: P) -> Result<(), RunnerError> {
        let start = Instant::now();
        let model = DiscreteHmm::load(path)?;
        tracing::info!(
            states = model.n_states(),
            symbols = model.n_symbols(),
            elapsed = ?start.elapsed(),
            "Time used to load HMM model"
        );
        self.bind_reference(Box::new(model))
    }

    /// Bind any reference model implementation
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidPhase` if no data has been loaded.
    pub fn with_reference_model(
        &mut self,
        model: Box<dyn ReferenceModel>,
    ) -> Result<(), RunnerError> {
        self.bind_reference(model)
    }

    fn bind_reference(&mut self, model: Box<dyn ReferenceModel>) -> Result<(), RunnerError> {
        self.require(Phase::DataLoaded, "bind a reference model")?;
        self.reference = Some(model);
        self.phase = match self.phase {
            Phase::Evaluated => Phase::Trained,
            phase => phase.max(Phase::ModelLoaded),
        };
        Ok(())
    }

    /// Train every registered estimator on the training dataset
    ///
    /// Calling this again performs a full retrain: every estimator discards
    /// its parameters and refits on the same data, and any earlier evaluation
    /// becomes stale.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidPhase` before a reference model is bound,
    /// `RunnerError::NoEstimator` if none is registered, and
    /// `RunnerError::Training` naming the first estimator that failed.
    pub fn train(&mut self) -> Result<Duration, RunnerError> {
        self.require(Phase::ModelLoaded, "train")?;
        if self.estimators.is_empty() {
            return Err(RunnerError::NoEstimator);
        }

        tracing::info!(
            train = self.train.len(),
            estimators = self.estimators.len(),
            "Training estimators"
        );
        let start = Instant::now();
        for estimator in &mut self.estimators {
            let estimator_start = Instant::now();
            if let Err(source) = estimator.train(&self.train) {
                self.phase = Phase::ModelLoaded;
                return Err(RunnerError::Training {
                    estimator: estimator.name().to_string(),
                    source,
                });
            }
            tracing::debug!(
                estimator = estimator.name(),
                elapsed = ?estimator_start.elapsed(),
                "Estimator trained"
            );
        }
        let elapsed = start.elapsed();

        tracing::info!(elapsed = ?elapsed, "Time used to train estimators");
        self.last_training_duration = Some(elapsed);
        self.phase = Phase::Trained;
        Ok(elapsed)
    }

    /// Compare, analyze and write the text report to `report_path`
    ///
    /// Nothing is written unless comparison and analysis both succeed.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidPhase` before training, or the first
    /// comparison, analysis or report failure.
    pub fn evaluate<P: AsRef<Path>>(&mut self, report_path: P) -> Result<Evaluation, RunnerError> {
        self.require(Phase::Trained, "evaluate")?;
        let Some(reference) = self.reference.as_deref() else {
            return Err(RunnerError::InvalidPhase {
                operation: "evaluate",
                phase: self.phase,
            });
        };

        let start = Instant::now();
        let records = compare(reference, &self.estimators, &self.test)?;
        let estimators: Vec<EstimatorInfo> = self
            .estimators
            .iter()
            .map(|e| EstimatorInfo {
                name: e.name().to_string(),
                hyperparameters: e.hyperparameters(),
            })
            .collect();
        let names: Vec<String> = estimators.iter().map(|e| e.name.clone()).collect();
        let summary = analyze(&records, &names, self.alpha)?;
        tracing::info!(
            records = records.len(),
            elapsed = ?start.elapsed(),
            "Time used to compare estimators"
        );

        let evaluation = Evaluation {
            estimators,
            records,
            summary,
        };

        let report_path = report_path.as_ref();
        let json_path = self.json_output.as_deref();
        evaluation.write_reports(report_path, json_path)?;
        tracing::info!(
            path = %report_path.display(),
            json = ?json_path,
            "Report written"
        );

        self.phase = Phase::Evaluated;
        Ok(evaluation)
    }

    /// Run the whole pipeline: bind the model, train, evaluate
    ///
    /// # Errors
    ///
    /// Returns the first error of any phase.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        model_path: P,
        report_path: Q,
    ) -> Result<Evaluation, RunnerError> {
        self.load_reference_model(model_path)?;
        self.train()?;
        self.evaluate(report_path)
    }

    fn require(&self, minimum: Phase, operation: &'static str) -> Result<(), RunnerError> {
        if self.phase < minimum {
            return Err(RunnerError::InvalidPhase {
                operation,
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Training dataset
    #[must_use]
    pub const fn train_set(&self) -> &Dataset {
        &self.train
    }

    /// Test dataset
    #[must_use]
    pub const fn test_set(&self) -> &Dataset {
        &self.test
    }

    /// Registered estimators in registration order
    #[must_use]
    pub fn estimators(&self) -> &[Box<dyn Estimator>] {
        &self.estimators
    }

    /// Wall-clock duration of the most recent successful `train`
    #[must_use]
    pub const fn last_training_duration(&self) -> Option<Duration> {
        self.last_training_duration
    }
}

fn load_dataset(role: &'static str, path: &Path) -> Result<Dataset, RunnerError> {
    Dataset::load(path).map_err(|source| RunnerError::Dataset {
        role,
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::comparator::tests::{constant, table};
    use crate::estimator::EstimatorState;
    use tempfile::TempDir;

    fn scenario_runner() -> EvaluationRunner {
        let train = Dataset::from_csv_str("1,2,3\n4,5,6\n").unwrap();
        let test = Dataset::from_csv_str("1,2,3\n").unwrap();
        let mut runner = EvaluationRunner::new(train, test);
        runner.add_estimator(constant("spectral", 0.05));
        runner
    }

    fn fair_coin() -> DiscreteHmm {
        DiscreteHmm::new(vec![1.0], vec![vec![1.0]], vec![vec![0.5, 0.5]]).unwrap()
    }

    fn all_binary_triples() -> Dataset {
        Dataset::from_csv_str("0,0,0\n0,0,1\n0,1,0\n0,1,1\n1,0,0\n1,0,1\n1,1,0\n1,1,1\n").unwrap()
    }

    #[test]
    fn test_new_runner_is_data_loaded() {
        let runner = scenario_runner();
        assert_eq!(runner.phase(), Phase::DataLoaded);
        assert_eq!(runner.train_set().len(), 2);
        assert_eq!(runner.test_set().len(), 1);
        assert!(runner.last_training_duration().is_none());
    }

    #[test]
    fn test_single_sequence_scenario() {
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("HMM_SL.log");
        let mut runner = scenario_runner();
        runner
            .with_reference_model(Box::new(table(vec![(vec![1, 2, 3], 0.04)])))
            .unwrap();
        assert_eq!(runner.phase(), Phase::ModelLoaded);

        runner.train().unwrap();
        assert_eq!(runner.phase(), Phase::Trained);
        assert!(runner.last_training_duration().is_some());

        let evaluation = runner.evaluate(&report).unwrap();
        assert_eq!(runner.phase(), Phase::Evaluated);
        assert_eq!(evaluation.records.len(), 1);
        assert!((evaluation.records[0].reference - 0.04).abs() < f64::EPSILON);
        assert_eq!(evaluation.records[0].primary(), Some(0.05));

        let kl = evaluation.summary.estimators[0].kl_divergence;
        assert!((kl - (-0.008_925_742)).abs() < 1e-8, "kl = {kl}");
        assert!(report.exists());
    }

    #[test]
    fn test_train_before_model_is_rejected() {
        let mut runner = scenario_runner();
        let result = runner.train();
        assert!(matches!(
            result,
            Err(RunnerError::InvalidPhase {
                operation: "train",
                phase: Phase::DataLoaded
            })
        ));
    }

    #[test]
    fn test_evaluate_before_train_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut runner = scenario_runner();
        runner
            .with_reference_model(Box::new(table(vec![(vec![1, 2, 3], 0.04)])))
            .unwrap();
        let result = runner.evaluate(dir.path().join("report.log"));
        assert!(matches!(result, Err(RunnerError::InvalidPhase { .. })));
    }

    #[test]
    fn test_train_without_estimator() {
        let test = Dataset::from_csv_str("0\n").unwrap();
        let mut runner = EvaluationRunner::new(Dataset::default(), test);
        runner.with_reference_model(Box::new(fair_coin())).unwrap();
        assert!(matches!(runner.train(), Err(RunnerError::NoEstimator)));
    }

    #[test]
    fn test_failed_analysis_writes_no_report() {
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("HMM_SL.log");
        let train = Dataset::from_csv_str("1,2,3\n").unwrap();
        let test = Dataset::from_csv_str("1,2,3\n").unwrap();
        let mut runner = EvaluationRunner::new(train, test);
        runner.add_estimator(constant("spectral", -0.01));
        runner
            .with_reference_model(Box::new(table(vec![(vec![1, 2, 3], 0.04)])))
            .unwrap();
        runner.train().unwrap();

        let result = runner.evaluate(&report);
        assert!(matches!(
            result,
            Err(RunnerError::Divergence(DivergenceError::Undefined { .. }))
        ));
        assert!(!report.exists());
        assert_eq!(runner.phase(), Phase::Trained);
    }

    #[test]
    fn test_failed_json_output_leaves_no_text_report() {
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("HMM_SL.log");
        let mut runner =
            scenario_runner().with_json_output(dir.path().join("missing").join("eval.json"));
        runner
            .with_reference_model(Box::new(table(vec![(vec![1, 2, 3], 0.04)])))
            .unwrap();
        runner.train().unwrap();

        let result = runner.evaluate(&report);
        assert!(matches!(result, Err(RunnerError::Report(_))));
        assert!(!report.exists());
        assert_eq!(runner.phase(), Phase::Trained);
    }

    #[test]
    fn test_failed_comparison_writes_no_report() {
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("HMM_SL.log");
        let mut runner = scenario_runner();
        runner.with_reference_model(Box::new(table(vec![]))).unwrap();
        runner.train().unwrap();

        let result = runner.evaluate(&report);
        assert!(matches!(result, Err(RunnerError::Compare(_))));
        assert!(!report.exists());
    }

    #[test]
    fn test_retrain_after_evaluation() {
        let dir = TempDir::new().unwrap();
        let mut runner = EvaluationRunner::from_config(
            all_binary_triples(),
            Dataset::from_csv_str("0,1\n").unwrap(),
            &EvalConfig::from_yaml("spectral:\n  rank: 1\n").unwrap(),
        );
        runner.with_reference_model(Box::new(fair_coin())).unwrap();
        runner.train().unwrap();
        runner.evaluate(dir.path().join("first.log")).unwrap();
        assert_eq!(runner.phase(), Phase::Evaluated);

        runner.train().unwrap();
        assert_eq!(runner.phase(), Phase::Trained);
        let evaluation = runner.evaluate(dir.path().join("second.log")).unwrap();
        assert!((evaluation.records[0].estimates[0] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_training_failure_names_estimator() {
        let mut runner = EvaluationRunner::from_config(
            Dataset::from_csv_str("0,1\n").unwrap(),
            Dataset::from_csv_str("0\n").unwrap(),
            &EvalConfig::default(),
        );
        runner.with_reference_model(Box::new(fair_coin())).unwrap();

        match runner.train() {
            Err(RunnerError::Training { estimator, source }) => {
                assert_eq!(estimator, "spectral");
                assert!(matches!(source, EstimatorError::InsufficientData(_)));
            }
            other => panic!("expected training failure, got {other:?}"),
        }
        assert_eq!(runner.phase(), Phase::ModelLoaded);
    }

    #[test]
    fn test_from_config_registers_em_when_enabled() {
        let config =
            EvalConfig::from_yaml("spectral:\n  rank: 1\nem:\n  enabled: true\n  states: 1\n")
                .unwrap();
        let mut runner = EvaluationRunner::from_config(
            all_binary_triples(),
            Dataset::from_csv_str("0,1,1\n1\n").unwrap(),
            &config,
        );
        let names: Vec<&str> = runner.estimators().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["spectral", "em"]);

        runner.with_reference_model(Box::new(fair_coin())).unwrap();
        runner.train().unwrap();
        assert!(runner
            .estimators()
            .iter()
            .all(|e| e.state() == EstimatorState::Trained));

        let dir = TempDir::new().unwrap();
        let evaluation = runner.evaluate(dir.path().join("report.log")).unwrap();
        for record in &evaluation.records {
            assert_eq!(record.estimates.len(), 2);
            assert!((record.estimates[0] - record.reference).abs() < 1e-9);
            assert!((record.estimates[1] - record.reference).abs() < 1e-6);
        }
    }

    #[test]
    fn test_add_estimator_requires_retraining() {
        let mut runner = scenario_runner();
        runner
            .with_reference_model(Box::new(table(vec![(vec![1, 2, 3], 0.04)])))
            .unwrap();
        runner.train().unwrap();
        runner.add_estimator(constant("em", 0.03));
        assert_eq!(runner.phase(), Phase::ModelLoaded);
    }

    #[test]
    fn test_load_reports_missing_dataset() {
        let dir = TempDir::new().unwrap();
        let train = dir.path().join("train.csv");
        std::fs::write(&train, "0,1,0\n").unwrap();

        let result =
            EvaluationRunner::load(&train, dir.path().join("test.csv"), &EvalConfig::default());
        match result {
            Err(RunnerError::Dataset { role, .. }) => assert_eq!(role, "testing"),
            Err(other) => panic!("expected dataset error, got {other:?}"),
            Ok(_) => panic!("expected dataset error"),
        }
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let mut runner = scenario_runner();
        let result = runner.load_reference_model("/nonexistent/model.json");
        assert!(matches!(result, Err(RunnerError::Model(ModelError::Load { .. }))));
        assert_eq!(runner.phase(), Phase::DataLoaded);
    }
}
