//! Baum-Welch (EM) estimator for a discrete HMM.

use super::{Estimator, EstimatorError, EstimatorState, Hyperparameter, Training};
use crate::config::EmSettings;
use crate::dataset::{Dataset, ObservationSequence};
use crate::hmm::{DiscreteHmm, ReferenceModel};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// HMM fitted by expectation-maximization
#[derive(Debug, Clone)]
struct FittedHmm {
    model: DiscreteHmm,
    log_likelihood_history: Vec<f64>,
}

/// Expected sufficient statistics accumulated over one E-step
struct Expectations {
    initial: DVector<f64>,
    transitions: DMatrix<f64>,
    transitions_from: DVector<f64>,
    emissions: DMatrix<f64>,
    occupancy: DVector<f64>,
    sequences: usize,
    log_likelihood: f64,
}

impl Expectations {
    fn new(n_states: usize, n_symbols: usize) -> Self {
        Self {
            initial: DVector::zeros(n_states),
            transitions: DMatrix::zeros(n_states, n_states),
            transitions_from: DVector::zeros(n_states),
            emissions: DMatrix::zeros(n_states, n_symbols),
            occupancy: DVector::zeros(n_states),
            sequences: 0,
            log_likelihood: 0.0,
        }
    }

    /// Scaled forward-backward pass over one sequence
    fn accumulate(&mut self, model: &DiscreteHmm, symbols: &[u32]) {
        let Some(pass) = model.forward(symbols) else {
            return;
        };
        let t_len = symbols.len();
        let n = model.n_states();
        let a = model.transition();
        let b = model.emission();

        let mut beta = DMatrix::<f64>::zeros(t_len, n);
        for i in 0..n {
            beta[(t_len - 1, i)] = 1.0;
        }
        for t in (0..t_len - 1).rev() {
            let next = symbols[t + 1] as usize;
            for i in 0..n {
                let sum: f64 = (0..n)
                    .map(|j| a[(i, j)] * b[(j, next)] * beta[(t + 1, j)])
                    .sum();
                beta[(t, i)] = sum / pass.scales[t + 1];
            }
        }

        for t in 0..t_len {
            let symbol = symbols[t] as usize;
            let norm: f64 = (0..n).map(|i| pass.alpha[(t, i)] * beta[(t, i)]).sum();
            if norm <= 0.0 {
                continue;
            }
            for i in 0..n {
                let gamma = pass.alpha[(t, i)] * beta[(t, i)] / norm;
                if t == 0 {
                    self.initial[i] += gamma;
                }
                if t + 1 < t_len {
                    self.transitions_from[i] += gamma;
                }
                self.emissions[(i, symbol)] += gamma;
                self.occupancy[i] += gamma;
            }
        }

        for t in 0..t_len - 1 {
            let next = symbols[t + 1] as usize;
            for i in 0..n {
                for j in 0..n {
                    self.transitions[(i, j)] += pass.alpha[(t, i)]
                        * a[(i, j)]
                        * b[(j, next)]
                        * beta[(t + 1, j)]
                        / pass.scales[t + 1];
                }
            }
        }

        self.sequences += 1;
        self.log_likelihood += pass.log_likelihood();
    }

    /// M-step: re-estimate parameters from expected counts
    #[allow(clippy::cast_precision_loss)]
    fn maximize(&self) -> Result<DiscreteHmm, EstimatorError> {
        let n = self.initial.len();
        let k = self.emissions.ncols();

        let initial = if self.sequences > 0 {
            normalize(self.initial.clone() / self.sequences as f64)
        } else {
            DVector::from_element(n, 1.0 / n as f64)
        };

        let mut transition = DMatrix::zeros(n, n);
        let mut emission = DMatrix::zeros(n, k);
        for i in 0..n {
            let from = self.transitions_from[i];
            for j in 0..n {
                transition[(i, j)] = if from > 0.0 {
                    self.transitions[(i, j)] / from
                } else {
                    1.0 / n as f64
                };
            }
            let occupied = self.occupancy[i];
            for s in 0..k {
                emission[(i, s)] = if occupied > 0.0 {
                    self.emissions[(i, s)] / occupied
                } else {
                    1.0 / k as f64
                };
            }
        }

        DiscreteHmm::from_parts(initial, normalize_rows(transition), normalize_rows(emission))
            .map_err(|e| EstimatorError::Numerical(e.to_string()))
    }
}

/// Baum-Welch estimator with a fixed number of hidden states
#[derive(Debug, Clone)]
pub struct BaumWelch {
    settings: EmSettings,
    training: Training<FittedHmm>,
}

impl BaumWelch {
    /// Create an untrained estimator
    #[must_use]
    pub const fn new(settings: EmSettings) -> Self {
        Self {
            settings,
            training: Training::Untrained,
        }
    }

    /// Settings this estimator trains with
    #[must_use]
    pub const fn settings(&self) -> &EmSettings {
        &self.settings
    }

    /// Fitted model, if trained
    #[must_use]
    pub fn model(&self) -> Option<&DiscreteHmm> {
        match &self.training {
            Training::Trained(fitted) => Some(&fitted.model),
            Training::Untrained => None,
        }
    }

    /// Total log-likelihood of the training data before each M-step
    #[must_use]
    pub fn log_likelihood_history(&self) -> &[f64] {
        match &self.training {
            Training::Trained(fitted) => &fitted.log_likelihood_history,
            Training::Untrained => &[],
        }
    }

    fn fit(&self, dataset: &Dataset) -> Result<FittedHmm, EstimatorError> {
        let n_states = self.settings.states;
        if n_states == 0 {
            return Err(EstimatorError::InvalidHyperparameter(
                "EM needs at least one hidden state".to_string(),
            ));
        }
        if dataset.iter().all(ObservationSequence::is_empty) {
            return Err(EstimatorError::InsufficientData(
                "EM needs at least one non-empty sequence".to_string(),
            ));
        }

        let n_symbols = dataset.alphabet_size();
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        let mut model = DiscreteHmm::from_parts(
            random_stochastic(1, n_states, &mut rng).row(0).transpose(),
            random_stochastic(n_states, n_states, &mut rng),
            random_stochastic(n_states, n_symbols, &mut rng),
        )
        .map_err(|e| EstimatorError::Numerical(e.to_string()))?;

        let mut history: Vec<f64> = Vec::new();
        for iteration in 0..self.settings.max_iterations {
            let mut expectations = Expectations::new(n_states, n_symbols);
            for sequence in dataset {
                if !sequence.is_empty() {
                    expectations.accumulate(&model, sequence.symbols());
                }
            }

            let log_likelihood = expectations.log_likelihood;
            model = expectations.maximize()?;

            let converged = history.last().is_some_and(|previous| {
                (log_likelihood - previous).abs() < self.settings.tolerance
            });
            history.push(log_likelihood);

            tracing::debug!(iteration, log_likelihood, "Baum-Welch iteration");
            if converged {
                break;
            }
        }

        Ok(FittedHmm {
            model,
            log_likelihood_history: history,
        })
    }
}

impl Default for BaumWelch {
    fn default() -> Self {
        Self::new(EmSettings::default())
    }
}

impl Estimator for BaumWelch {
    fn name(&self) -> &str {
        "em"
    }

    fn state(&self) -> EstimatorState {
        self.training.state()
    }

    fn train(&mut self, dataset: &Dataset) -> Result<(), EstimatorError> {
        if self.training.state() == EstimatorState::Trained {
            tracing::debug!("Discarding previously fitted EM parameters");
        }
        let fitted = self.fit(dataset)?;
        self.training = Training::Trained(fitted);
        Ok(())
    }

    fn predict(&self, sequence: &ObservationSequence) -> Result<f64, EstimatorError> {
        let fitted = self.training.params(self.name())?;
        fitted
            .model
            .probability(sequence)
            .map_err(|e| EstimatorError::Numerical(e.to_string()))
    }

    fn hyperparameters(&self) -> Vec<Hyperparameter> {
        vec![
            Hyperparameter::new("states", self.settings.states),
            Hyperparameter::new("max_iterations", self.settings.max_iterations),
            Hyperparameter::new("tolerance", self.settings.tolerance),
            Hyperparameter::new("seed", self.settings.seed),
        ]
    }
}

/// Random row-stochastic matrix bounded away from zero
fn random_stochastic<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> DMatrix<f64> {
    let matrix = DMatrix::from_fn(rows, cols, |_, _| rng.gen::<f64>() + 0.1);
    normalize_rows(matrix)
}

fn normalize(vector: DVector<f64>) -> DVector<f64> {
    let sum = vector.sum();
    if sum > 0.0 {
        vector / sum
    } else {
        vector
    }
}

fn normalize_rows(mut matrix: DMatrix<f64>) -> DMatrix<f64> {
    for mut row in matrix.row_iter_mut() {
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
    matrix
}
