//! Discrete hidden Markov model used as the reference distribution.
//!
//! The evaluation pipeline only needs [`ReferenceModel::probability`]; the
//! concrete [`DiscreteHmm`] computes it with the scaled forward algorithm and
//! is loaded from a JSON or YAML parameter artifact.

use crate::dataset::{Dataset, ObservationSequence};
use nalgebra::{DMatrix, DVector};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tolerance for stochastic-row validation
const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Errors that can occur when loading or querying a reference model
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load reference model from {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    #[error("Invalid model parameters: {0}")]
    InvalidParameters(String),

    #[error("Probability query failed: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Read-only sequence-probability oracle
pub trait ReferenceModel {
    /// Probability of observing `sequence` from the start of the process
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot score the sequence.
    fn probability(&self, sequence: &ObservationSequence) -> Result<f64, ModelError>;
}

/// Persisted HMM parameters, rows indexed by hidden state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Initial state distribution
    pub initial: Vec<f64>,
    /// `transition[i][j]` = P(next state j | state i)
    pub transition: Vec<Vec<f64>>,
    /// `emission[i][k]` = P(symbol k | state i)
    pub emission: Vec<Vec<f64>>,
}

/// Scaled forward variables for one sequence
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// Normalized forward probabilities, one row per time step
    pub alpha: DMatrix<f64>,
    /// Per-step scaling factors; their product is the sequence probability
    pub scales: Vec<f64>,
}

impl ForwardPass {
    /// Log-probability of the scored sequence
    #[must_use]
    pub fn log_likelihood(&self) -> f64 {
        self.scales.iter().map(|s| s.ln()).sum()
    }
}

/// A discrete-emission hidden Markov model
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteHmm {
    initial: DVector<f64>,
    transition: DMatrix<f64>,
    emission: DMatrix<f64>,
}

impl DiscreteHmm {
    /// Create a model after validating dimensions and probability rows
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameters` if dimensions disagree or any
    /// row is not a probability distribution.
    pub fn new(
        initial: Vec<f64>,
        transition: Vec<Vec<f64>>,
        emission: Vec<Vec<f64>>,
    ) -> Result<Self, ModelError> {
        let n_states = initial.len();
        if n_states == 0 {
            return Err(ModelError::InvalidParameters(
                "model must have at least one hidden state".to_string(),
            ));
        }
        if transition.len() != n_states || transition.iter().any(|row| row.len() != n_states) {
            return Err(ModelError::InvalidParameters(format!(
                "transition matrix must be {n_states}x{n_states}"
            )));
        }
        if emission.len() != n_states {
            return Err(ModelError::InvalidParameters(format!(
                "emission matrix must have {n_states} rows, found {}",
                emission.len()
            )));
        }
        let n_symbols = emission.first().map_or(0, Vec::len);
        if n_symbols == 0 || emission.iter().any(|row| row.len() != n_symbols) {
            return Err(ModelError::InvalidParameters(
                "emission rows must be non-empty and of equal length".to_string(),
            ));
        }

        Self::from_parts(
            DVector::from_vec(initial),
            DMatrix::from_fn(n_states, n_states, |i, j| transition[i][j]),
            DMatrix::from_fn(n_states, n_symbols, |i, k| emission[i][k]),
        )
    }

    /// Create a model from `nalgebra` parameter blocks
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameters` if any row is not a
    /// probability distribution or the shapes disagree.
    pub fn from_parts(
        initial: DVector<f64>,
        transition: DMatrix<f64>,
        emission: DMatrix<f64>,
    ) -> Result<Self, ModelError> {
        let n = initial.len();
        if transition.shape() != (n, n) || emission.nrows() != n || emission.ncols() == 0 {
            return Err(ModelError::InvalidParameters(format!(
                "inconsistent shapes: initial {n}, transition {:?}, emission {:?}",
                transition.shape(),
                emission.shape()
            )));
        }

        check_distribution("initial", initial.iter().copied())?;
        for i in 0..n {
            check_distribution(
                &format!("transition row {i}"),
                transition.row(i).iter().copied(),
            )?;
            check_distribution(&format!("emission row {i}"), emission.row(i).iter().copied())?;
        }

        Ok(Self {
            initial,
            transition,
            emission,
        })
    }

    /// Load a model from a `.json`, `.yaml` or `.yml` artifact
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Load` if the artifact is missing, unreadable,
    /// unparsable, or describes an invalid model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let load_error = |reason: String| ModelError::Load {
            path: path.to_path_buf(),
            reason,
        };

        if !path.exists() {
            return Err(load_error("file not found".to_string()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let artifact: ModelArtifact = if is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| load_error(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| load_error(e.to_string()))?
        };

        let model = Self::new(artifact.initial, artifact.transition, artifact.emission)
            .map_err(|e| load_error(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            states = model.n_states(),
            symbols = model.n_symbols(),
            "Loaded reference HMM"
        );

        Ok(model)
    }

    /// Write the model as an artifact, YAML for `.yaml`/`.yml` and JSON otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let path = path.as_ref();
        let artifact = self.to_artifact();
        let content = if is_yaml(path) {
            serde_yaml::to_string(&artifact)
                .map_err(|e| ModelError::InvalidParameters(e.to_string()))?
        } else {
            serde_json::to_string_pretty(&artifact)
                .map_err(|e| ModelError::InvalidParameters(e.to_string()))?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parameters in artifact form
    #[must_use]
    pub fn to_artifact(&self) -> ModelArtifact {
        let rows = |m: &DMatrix<f64>| -> Vec<Vec<f64>> {
            m.row_iter().map(|row| row.iter().copied().collect()).collect()
        };
        ModelArtifact {
            initial: self.initial.iter().copied().collect(),
            transition: rows(&self.transition),
            emission: rows(&self.emission),
        }
    }

    /// Number of hidden states
    #[must_use]
    pub fn n_states(&self) -> usize {
        self.initial.len()
    }

    /// Number of observable symbols
    #[must_use]
    pub fn n_symbols(&self) -> usize {
        self.emission.ncols()
    }

    /// Initial state distribution
    #[must_use]
    pub const fn initial(&self) -> &DVector<f64> {
        &self.initial
    }

    /// Transition matrix (rows: from-state)
    #[must_use]
    pub const fn transition(&self) -> &DMatrix<f64> {
        &self.transition
    }

    /// Emission matrix (rows: state, columns: symbol)
    #[must_use]
    pub const fn emission(&self) -> &DMatrix<f64> {
        &self.emission
    }

    /// Scaled forward pass over `symbols`
    ///
    /// Returns `None` when the sequence is empty, uses a symbol outside the
    /// emission alphabet, or has probability zero under the model.
    #[must_use]
    pub fn forward(&self, symbols: &[u32]) -> Option<ForwardPass> {
        let t_len = symbols.len();
        let n = self.n_states();
        if t_len == 0 || symbols.iter().any(|&s| s as usize >= self.n_symbols()) {
            return None;
        }

        let mut alpha = DMatrix::zeros(t_len, n);
        let mut scales = Vec::with_capacity(t_len);

        for (t, &symbol) in symbols.iter().enumerate() {
            let k = symbol as usize;
            for j in 0..n {
                let prior = if t == 0 {
                    self.initial[j]
                } else {
                    (0..n)
                        .map(|i| alpha[(t - 1, i)] * self.transition[(i, j)])
                        .sum::<f64>()
                };
                alpha[(t, j)] = prior * self.emission[(j, k)];
            }

            let scale: f64 = alpha.row(t).sum();
            if scale <= 0.0 {
                return None;
            }
            for j in 0..n {
                alpha[(t, j)] /= scale;
            }
            scales.push(scale);
        }

        Some(ForwardPass { alpha, scales })
    }

    /// Log-probability of a symbol sequence (`-inf` when impossible)
    #[must_use]
    pub fn log_probability(&self, symbols: &[u32]) -> f64 {
        if symbols.is_empty() {
            return 0.0;
        }
        self.forward(symbols)
            .map_or(f64::NEG_INFINITY, |pass| pass.log_likelihood())
    }

    /// Draw `count` sequences of `length` symbols each
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameters` if a parameter row cannot be
    /// sampled from.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        count: usize,
        length: usize,
        rng: &mut R,
    ) -> Result<Dataset, ModelError> {
        let weighted = |weights: Vec<f64>| {
            WeightedIndex::new(weights).map_err(|e| ModelError::InvalidParameters(e.to_string()))
        };

        let initial = weighted(self.initial.iter().copied().collect())?;
        let transitions = (0..self.n_states())
            .map(|i| weighted(self.transition.row(i).iter().copied().collect()))
            .collect::<Result<Vec<_>, _>>()?;
        let emissions = (0..self.n_states())
            .map(|i| weighted(self.emission.row(i).iter().copied().collect()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sequences = Vec::with_capacity(count);
        for _ in 0..count {
            let mut symbols = Vec::with_capacity(length);
            let mut state = initial.sample(rng);
            for step in 0..length {
                if step > 0 {
                    state = transitions[state].sample(rng);
                }
                #[allow(clippy::cast_possible_truncation)]
                let symbol = emissions[state].sample(rng) as u32;
                symbols.push(symbol);
            }
            sequences.push(ObservationSequence::new(symbols));
        }

        Ok(Dataset::from(sequences))
    }
}

impl ReferenceModel for DiscreteHmm {
    fn probability(&self, sequence: &ObservationSequence) -> Result<f64, ModelError> {
        if sequence.is_empty() {
            return Ok(1.0);
        }
        Ok(self.log_probability(sequence.symbols()).exp())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

fn check_distribution(
    name: &str,
    values: impl Iterator<Item = f64>,
) -> Result<(), ModelError> {
    let mut sum = 0.0;
    for value in values {
        if !(0.0..=1.0).contains(&value) {
            return Err(ModelError::InvalidParameters(format!(
                "{name} contains {value}, outside [0, 1]"
            )));
        }
        sum += value;
    }
    if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(ModelError::InvalidParameters(format!(
            "{name} sums to {sum}, expected 1"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    fn coin_model() -> DiscreteHmm {
        DiscreteHmm::new(
            vec![0.6, 0.4],
            vec![vec![0.7, 0.3], vec![0.4, 0.6]],
            vec![vec![0.5, 0.5], vec![0.9, 0.1]],
        )
        .unwrap()
    }

    fn all_sequences(n_symbols: u32, length: usize) -> Vec<Vec<u32>> {
        let mut sequences = vec![Vec::new()];
        for _ in 0..length {
            sequences = sequences
                .into_iter()
                .flat_map(|prefix| {
                    (0..n_symbols).map(move |s| {
                        let mut next = prefix.clone();
                        next.push(s);
                        next
                    })
                })
                .collect();
        }
        sequences
    }

    #[test]
    fn test_single_state_probability() {
        let model = DiscreteHmm::new(vec![1.0], vec![vec![1.0]], vec![vec![0.2, 0.8]]).unwrap();
        let p = model
            .probability(&ObservationSequence::new(vec![1, 1, 0]))
            .unwrap();
        assert!((p - 0.128).abs() < 1e-12);
    }

    #[test]
    fn test_first_symbol_probability() {
        let model = coin_model();
        let p = model.probability(&ObservationSequence::new(vec![0])).unwrap();
        assert!((p - (0.6 * 0.5 + 0.4 * 0.9)).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_length_probabilities_sum_to_one() {
        let model = coin_model();
        for length in 1..=4 {
            let total: f64 = all_sequences(2, length)
                .into_iter()
                .map(|s| model.probability(&ObservationSequence::new(s)).unwrap())
                .sum();
            assert!((total - 1.0).abs() < 1e-9, "length {length}: {total}");
        }
    }

    #[test]
    fn test_empty_sequence_has_probability_one() {
        let model = coin_model();
        let p = model.probability(&ObservationSequence::new(vec![])).unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn test_unknown_symbol_has_probability_zero() {
        let model = coin_model();
        let p = model.probability(&ObservationSequence::new(vec![0, 7])).unwrap();
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_new_rejects_bad_rows() {
        let result = DiscreteHmm::new(vec![0.5, 0.4], vec![vec![1.0, 0.0]; 2], vec![vec![1.0]; 2]);
        assert!(matches!(result, Err(ModelError::InvalidParameters(_))));

        let result = DiscreteHmm::new(vec![1.0], vec![vec![1.0, 0.0]], vec![vec![1.0]]);
        assert!(matches!(result, Err(ModelError::InvalidParameters(_))));

        let result = DiscreteHmm::new(vec![], vec![], vec![]);
        assert!(matches!(result, Err(ModelError::InvalidParameters(_))));
    }

    #[test]
    fn test_load_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("model.json");
        let yaml = dir.path().join("model.yaml");

        std::fs::write(
            &json,
            r#"{"initial":[1.0],"transition":[[1.0]],"emission":[[0.25,0.75]]}"#,
        )
        .unwrap();
        std::fs::write(
            &yaml,
            "initial: [1.0]\ntransition:\n  - [1.0]\nemission:\n  - [0.25, 0.75]\n",
        )
        .unwrap();

        let from_json = DiscreteHmm::load(&json).unwrap();
        let from_yaml = DiscreteHmm::load(&yaml).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.n_symbols(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let result = DiscreteHmm::load("/nonexistent/model.json");
        assert!(matches!(result, Err(ModelError::Load { .. })));
    }

    #[test]
    fn test_load_corrupt_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = DiscreteHmm::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::Load { .. }));
        assert!(err.to_string().contains("model.json"));
    }

    #[test]
    fn test_load_invalid_parameters_is_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"initial":[0.5],"transition":[[1.0]],"emission":[[1.0]]}"#,
        )
        .unwrap();

        assert!(matches!(
            DiscreteHmm::load(&path),
            Err(ModelError::Load { .. })
        ));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coin.yml");
        let model = coin_model();

        model.save(&path).unwrap();
        let loaded = DiscreteHmm::load(&path).unwrap();
        assert_eq!(loaded.to_artifact(), model.to_artifact());
    }

    #[test]
    fn test_sample_shapes() {
        let model = coin_model();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let dataset = model.sample(25, 4, &mut rng).unwrap();

        assert_eq!(dataset.len(), 25);
        assert!(dataset.iter().all(|s| s.len() == 4));
        assert!(dataset.alphabet_size() <= 2);
    }

    #[test]
    fn test_forward_alpha_rows_normalized() {
        let model = coin_model();
        let pass = model.forward(&[0, 1, 1, 0]).unwrap();
        for t in 0..4 {
            assert!((pass.alpha.row(t).sum() - 1.0).abs() < 1e-12);
        }
        let direct = model
            .probability(&ObservationSequence::new(vec![0, 1, 1, 0]))
            .unwrap();
        assert!((pass.log_likelihood().exp() - direct).abs() < 1e-15);
    }
}
