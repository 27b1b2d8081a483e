//! Spectral (method-of-moments) learner for HMM sequence probabilities.
//!
//! Estimates observable operators from unigram, bigram and trigram
//! statistics of the first three symbols of each training sequence:
//!
//! ```text
//! U    = top-m left singular vectors of P21
//! b1   = Uᵀ P1
//! b∞   = (P21ᵀ U)⁺ P1
//! B_x  = (Uᵀ P3x1)(Uᵀ P21)⁺
//! Pr[x1..xt] ≈ b∞ᵀ B_xt … B_x1 b1
//! ```
//!
//! Estimates are not constrained to [0, 1] and can be negative on sparse data.

use super::{Estimator, EstimatorError, EstimatorState, Hyperparameter, Training};
use crate::dataset::{Dataset, ObservationSequence};
use nalgebra::{DMatrix, DVector};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Singular values below this are treated as zero in pseudo-inverses
const PINV_EPSILON: f64 = 1e-10;

/// Observable-operator parameters learned by [`SpectralLearner`]
#[derive(Debug, Clone)]
struct SpectralModel {
    b1: DVector<f64>,
    b_inf: DVector<f64>,
    /// Observed symbol code → row/column index in the moment matrices
    symbols: BTreeMap<u32, usize>,
    /// One `m x m` operator per observed symbol, in index order
    operators: Vec<DMatrix<f64>>,
}

/// Spectral learner with rank hyperparameter `m`
#[derive(Debug, Clone)]
pub struct SpectralLearner {
    rank: usize,
    training: Training<SpectralModel>,
}

impl SpectralLearner {
    /// Create an untrained learner with rank `m`
    #[must_use]
    pub const fn new(rank: usize) -> Self {
        Self {
            rank,
            training: Training::Untrained,
        }
    }

    /// Rank hyperparameter `m`
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Number of distinct symbols the trained operators cover
    #[must_use]
    pub fn alphabet_size(&self) -> Option<usize> {
        match &self.training {
            Training::Trained(model) => Some(model.operators.len()),
            Training::Untrained => None,
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::many_single_char_names)]
    fn fit(&self, dataset: &Dataset) -> Result<SpectralModel, EstimatorError> {
        // Codes may be sparse, so moments are indexed by observed symbol only
        let mut symbols = BTreeMap::new();
        for symbol in dataset.iter().flat_map(|s| s.iter()) {
            symbols.entry(symbol).or_insert(0);
        }
        for (index, slot) in symbols.values_mut().enumerate() {
            *slot = index;
        }

        let triples: Vec<[usize; 3]> = dataset
            .iter()
            .filter(|s| s.len() >= 3)
            .map(|s| {
                let x = s.symbols();
                [symbols[&x[0]], symbols[&x[1]], symbols[&x[2]]]
            })
            .collect();

        if triples.is_empty() {
            return Err(EstimatorError::InsufficientData(
                "spectral learning needs at least one sequence of length 3".to_string(),
            ));
        }

        let n = symbols.len();
        if self.rank == 0 || self.rank > n {
            return Err(EstimatorError::InvalidHyperparameter(format!(
                "rank must be in 1..={n} for {n} distinct symbols, got {}",
                self.rank
            )));
        }

        let weight = 1.0 / triples.len() as f64;
        let mut p1 = DVector::<f64>::zeros(n);
        let mut p21 = DMatrix::<f64>::zeros(n, n);
        let mut p3x1 = vec![DMatrix::<f64>::zeros(n, n); n];
        for &[a, b, c] in &triples {
            p1[a] += weight;
            p21[(b, a)] += weight;
            p3x1[b][(c, a)] += weight;
        }

        let svd = p21.clone().svd(true, false);
        let u_full = svd.u.ok_or_else(|| {
            EstimatorError::Numerical("SVD did not return left singular vectors".to_string())
        })?;
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&i, &j| {
            svd.singular_values[j]
                .partial_cmp(&svd.singular_values[i])
                .unwrap_or(Ordering::Equal)
        });

        tracing::debug!(
            rank = self.rank,
            symbols = n,
            triples = triples.len(),
            leading_singular_value = svd.singular_values[order[0]],
            "Estimated spectral moments"
        );

        let u = DMatrix::from_fn(n, self.rank, |r, c| u_full[(r, order[c])]);
        let u_t = u.transpose();

        let b1 = &u_t * &p1;
        let b_inf = pseudo_inverse(p21.transpose() * &u)? * &p1;
        let projected_inverse = pseudo_inverse(&u_t * &p21)?;
        let operators = p3x1
            .iter()
            .map(|p3| &u_t * p3 * &projected_inverse)
            .collect();

        Ok(SpectralModel {
            b1,
            b_inf,
            symbols,
            operators,
        })
    }
}

impl Default for SpectralLearner {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Estimator for SpectralLearner {
    fn name(&self) -> &str {
        "spectral"
    }

    fn state(&self) -> EstimatorState {
        self.training.state()
    }

    fn train(&mut self, dataset: &Dataset) -> Result<(), EstimatorError> {
        if self.training.state() == EstimatorState::Trained {
            tracing::debug!("Discarding previously learned spectral operators");
        }
        let model = self.fit(dataset)?;
        self.training = Training::Trained(model);
        Ok(())
    }

    fn predict(&self, sequence: &ObservationSequence) -> Result<f64, EstimatorError> {
        let model = self.training.params(self.name())?;

        let mut state = model.b1.clone();
        for symbol in sequence.iter() {
            let Some(&index) = model.symbols.get(&symbol) else {
                return Ok(0.0);
            };
            state = &model.operators[index] * state;
        }

        Ok(model.b_inf.dot(&state))
    }

    fn hyperparameters(&self) -> Vec<Hyperparameter> {
        vec![Hyperparameter::new("rank", self.rank)]
    }
}

fn pseudo_inverse(matrix: DMatrix<f64>) -> Result<DMatrix<f64>, EstimatorError> {
    matrix
        .pseudo_inverse(PINV_EPSILON)
        .map_err(|e| EstimatorError::Numerical(format!("pseudo-inverse failed: {e}")))
}
