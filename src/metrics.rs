//! Divergence analysis over aligned probability columns.
//!
//! The Kullback-Leibler figure computed here is the literal pointwise sum
//! `Σ p[i] * ln(p[i] / q[i])` over per-sequence probability scalars. Those
//! scalars are not a normalized distribution over a shared support, so the
//! value is not a textbook KL divergence and may be negative.

use crate::comparator::EvaluationRecord;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

/// Which input vector held an invalid entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The reference ("true") vector
    True,
    /// The approximating vector
    Approx,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => f.write_str("true"),
            Self::Approx => f.write_str("approximate"),
        }
    }
}

/// Errors that make a divergence undefined
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DivergenceError {
    #[error("Probability vectors differ in length: {true_len} vs {approx_len}")]
    LengthMismatch { true_len: usize, approx_len: usize },

    #[error("Divergence undefined: {side} probability at index {index} is {value}, expected a finite positive number")]
    Undefined { side: Side, index: usize, value: f64 },
}

/// Pointwise log-ratio sum `Σ p[i] * ln(p[i] / q[i])`
///
/// Empty vectors give `0.0`.
///
/// # Errors
///
/// Returns `DivergenceError::LengthMismatch` if the vectors differ in length
/// and `DivergenceError::Undefined` if any entry is not finite and strictly
/// positive.
pub fn kl_divergence(true_probs: &[f64], approx_probs: &[f64]) -> Result<f64, DivergenceError> {
    if true_probs.len() != approx_probs.len() {
        return Err(DivergenceError::LengthMismatch {
            true_len: true_probs.len(),
            approx_len: approx_probs.len(),
        });
    }

    let mut total = 0.0;
    for (index, (&p, &q)) in true_probs.iter().zip(approx_probs).enumerate() {
        check_positive(Side::True, index, p)?;
        check_positive(Side::Approx, index, q)?;
        total += p * (p / q).ln();
    }
    Ok(total)
}

fn check_positive(side: Side, index: usize, value: f64) -> Result<(), DivergenceError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DivergenceError::Undefined { side, index, value })
    }
}

/// Compute mean of samples
#[allow(clippy::cast_precision_loss)]
fn compute_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Compute standard deviation of samples
#[allow(clippy::cast_precision_loss)]
fn compute_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(samples);
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Result of a significance test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// t-statistic
    pub t_statistic: f64,
    /// p-value
    pub p_value: f64,
    /// Degrees of freedom
    pub degrees_of_freedom: f64,
    /// Is result significant at the given alpha?
    pub is_significant: bool,
    /// Cohen's d effect size
    pub cohens_d: f64,
    /// Effect size interpretation
    pub effect_interpretation: String,
}

/// Paired t-test for comparing two sample sets
///
/// Returns `None` if the samples differ in length, have fewer than two
/// entries, or their differences have no variance. The variance cutoff is
/// relative to the differences' magnitude, so tiny-valued samples such as
/// long-sequence probabilities are still compared.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(
    samples_a: &[f64],
    samples_b: &[f64],
    alpha: f64,
) -> Option<SignificanceResult> {
    if samples_a.len() != samples_b.len() || samples_a.len() < 2 {
        return None;
    }

    let n = samples_a.len();
    let differences: Vec<f64> = samples_a
        .iter()
        .zip(samples_b.iter())
        .map(|(a, b)| a - b)
        .collect();

    let mean_diff = compute_mean(&differences);
    let std_diff = compute_std(&differences);

    // Spread below the rounding error of summing n differences is no spread
    let magnitude = differences.iter().map(|d| d.abs()).sum::<f64>();
    if std_diff <= f64::EPSILON * magnitude {
        return None;
    }

    let t_statistic = mean_diff / (std_diff / (n as f64).sqrt());
    let df = (n - 1) as f64;

    // Two-tailed
    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    let cohens_d = mean_diff / std_diff;
    let effect_interpretation = interpret_cohens_d(cohens_d);

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect_interpretation,
    })
}

/// Interpret Cohen's d effect size
fn interpret_cohens_d(d: f64) -> String {
    let abs_d = d.abs();
    if abs_d < 0.2 {
        "negligible".to_string()
    } else if abs_d < 0.5 {
        "small".to_string()
    } else if abs_d < 0.8 {
        "medium".to_string()
    } else {
        "large".to_string()
    }
}

/// Aggregate figures for one estimator column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSummary {
    /// Estimator name
    pub name: String,
    /// Pointwise log-ratio sum against the reference column
    pub kl_divergence: f64,
    /// Sum of the estimator's probabilities
    pub probability_sum: f64,
    /// Mean of `|estimate - reference|`
    pub mean_absolute_error: f64,
}

/// Paired comparison of the primary and secondary estimators' absolute errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorComparison {
    /// Primary estimator name
    pub primary: String,
    /// Secondary estimator name
    pub secondary: String,
    /// Paired t-test on per-sequence absolute errors
    pub significance: SignificanceResult,
}

/// Summary derived from the aligned probability columns of all records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSummary {
    /// Number of records analyzed
    pub records: usize,
    /// Sum of the reference probabilities
    pub reference_sum: f64,
    /// One entry per estimator, in registration order
    pub estimators: Vec<EstimatorSummary>,
    /// Primary vs secondary error comparison, when available
    pub comparison: Option<ErrorComparison>,
}

/// Build the divergence summary for `records`
///
/// `names` lists the estimators in the same order as
/// [`EvaluationRecord::estimates`].
///
/// # Errors
///
/// Returns a `DivergenceError` if any estimator's divergence is undefined or
/// a record's estimates don't line up with `names`.
pub fn analyze(
    records: &[EvaluationRecord],
    names: &[String],
    alpha: f64,
) -> Result<DivergenceSummary, DivergenceError> {
    let reference: Vec<f64> = records.iter().map(|r| r.reference).collect();

    let mut columns = Vec::with_capacity(names.len());
    for column in 0..names.len() {
        let values = records
            .iter()
            .map(|r| r.estimates.get(column).copied())
            .collect::<Option<Vec<f64>>>()
            .ok_or(DivergenceError::LengthMismatch {
                true_len: names.len(),
                approx_len: records
                    .iter()
                    .map(|r| r.estimates.len())
                    .min()
                    .unwrap_or(0),
            })?;
        columns.push(values);
    }

    let errors: Vec<Vec<f64>> = columns
        .iter()
        .map(|column| {
            column
                .iter()
                .zip(&reference)
                .map(|(estimate, truth)| (estimate - truth).abs())
                .collect()
        })
        .collect();

    let mut estimators = Vec::with_capacity(names.len());
    for ((name, column), error) in names.iter().zip(&columns).zip(&errors) {
        let kl = kl_divergence(&reference, column)?;
        tracing::debug!(estimator = %name, kl_divergence = kl, "Computed divergence");
        estimators.push(EstimatorSummary {
            name: name.clone(),
            kl_divergence: kl,
            probability_sum: column.iter().sum(),
            mean_absolute_error: compute_mean(error),
        });
    }

    let comparison = match (names, errors.as_slice()) {
        ([primary, secondary, ..], [primary_errors, secondary_errors, ..]) => {
            paired_t_test(primary_errors, secondary_errors, alpha).map(|significance| {
                ErrorComparison {
                    primary: primary.clone(),
                    secondary: secondary.clone(),
                    significance,
                }
            })
        }
        _ => None,
    };

    Ok(DivergenceSummary {
        records: records.len(),
        reference_sum: reference.iter().sum(),
        estimators,
        comparison,
    })
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]
mod tests {
    use super::*;
    use crate::dataset::ObservationSequence;

    fn record(index: usize, reference: f64, estimates: Vec<f64>) -> EvaluationRecord {
        EvaluationRecord {
            index,
            reference,
            estimates,
            length: 1,
            sequence: ObservationSequence::new(vec![0]),
        }
    }

    // =========================================================================
    // kl_divergence
    // =========================================================================

    #[test]
    fn test_kl_of_identical_vectors_is_zero() {
        let p = vec![0.2, 0.01, 0.5, 1e-9];
        assert!(kl_divergence(&p, &p).unwrap().abs() < 1e-15);
    }

    #[test]
    fn test_kl_matches_literal_formula() {
        let kl = kl_divergence(&[0.04], &[0.05]).unwrap();
        assert!((kl - 0.04 * (0.04_f64 / 0.05).ln()).abs() < 1e-15);
        assert!((kl - (-0.008_925_742)).abs() < 1e-8);
    }

    #[test]
    fn test_kl_can_be_negative_for_unnormalized_inputs() {
        // Per-sequence scalars, not distributions: Gibbs' inequality does not apply
        let kl = kl_divergence(&[0.1, 0.1], &[0.2, 0.3]).unwrap();
        assert!(kl < 0.0);
    }

    #[test]
    fn test_kl_nonnegative_for_normalized_inputs() {
        let kl = kl_divergence(&[0.5, 0.3, 0.2], &[0.2, 0.3, 0.5]).unwrap();
        assert!(kl >= 0.0);
    }

    #[test]
    fn test_kl_length_mismatch() {
        let result = kl_divergence(&[0.1, 0.2, 0.3], &[0.1, 0.2]);
        assert_eq!(
            result,
            Err(DivergenceError::LengthMismatch {
                true_len: 3,
                approx_len: 2
            })
        );
    }

    #[test]
    fn test_kl_rejects_zero_and_negative() {
        let zero = kl_divergence(&[0.1, 0.2], &[0.1, 0.0]);
        assert!(matches!(
            zero,
            Err(DivergenceError::Undefined {
                side: Side::Approx,
                index: 1,
                ..
            })
        ));

        let negative = kl_divergence(&[-0.1], &[0.1]);
        assert!(matches!(
            negative,
            Err(DivergenceError::Undefined {
                side: Side::True,
                index: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_kl_rejects_non_finite() {
        assert!(kl_divergence(&[f64::NAN], &[0.1]).is_err());
        assert!(kl_divergence(&[0.1], &[f64::INFINITY]).is_err());
    }

    #[test]
    fn test_kl_of_empty_vectors() {
        assert_eq!(kl_divergence(&[], &[]).unwrap(), 0.0);
    }

    // =========================================================================
    // analyze
    // =========================================================================

    #[test]
    fn test_analyze_single_estimator() {
        let records = vec![record(0, 0.04, vec![0.05]), record(1, 0.5, vec![0.25])];
        let summary = analyze(&records, &["spectral".to_string()], 0.05).unwrap();

        assert_eq!(summary.records, 2);
        assert!((summary.reference_sum - 0.54).abs() < 1e-12);
        assert_eq!(summary.estimators.len(), 1);

        let spectral = &summary.estimators[0];
        assert_eq!(spectral.name, "spectral");
        assert!((spectral.probability_sum - 0.30).abs() < 1e-12);
        assert!((spectral.mean_absolute_error - (0.01 + 0.25) / 2.0).abs() < 1e-12);
        let expected = 0.04 * (0.04_f64 / 0.05).ln() + 0.5 * (0.5_f64 / 0.25).ln();
        assert!((spectral.kl_divergence - expected).abs() < 1e-12);
        assert!(summary.comparison.is_none());
    }

    #[test]
    fn test_analyze_fails_on_undefined_divergence() {
        let records = vec![record(0, 0.04, vec![-0.01])];
        let result = analyze(&records, &["spectral".to_string()], 0.05);
        assert!(matches!(result, Err(DivergenceError::Undefined { .. })));
    }

    #[test]
    fn test_analyze_detects_misaligned_records() {
        let records = vec![record(0, 0.04, vec![0.05])];
        let names = vec!["spectral".to_string(), "em".to_string()];
        let result = analyze(&records, &names, 0.05);
        assert!(matches!(result, Err(DivergenceError::LengthMismatch { .. })));
    }

    #[test]
    fn test_analyze_compares_two_estimators() {
        let records: Vec<EvaluationRecord> = (0..20)
            .map(|i| {
                let truth = 0.01 + i as f64 * 0.001;
                let close = truth + 0.0001 * ((i % 3) as f64 + 1.0);
                let far = truth + 0.005 + 0.0002 * ((i % 5) as f64);
                record(i, truth, vec![close, far])
            })
            .collect();
        let names = vec!["spectral".to_string(), "em".to_string()];

        let summary = analyze(&records, &names, 0.05).unwrap();
        let comparison = summary.comparison.unwrap();
        assert_eq!(comparison.primary, "spectral");
        assert_eq!(comparison.secondary, "em");
        assert!(comparison.significance.is_significant);
        assert!(comparison.significance.t_statistic < 0.0);
    }

    #[test]
    fn test_analyze_compares_tiny_probabilities() {
        // Long sequences have probabilities far below f64::EPSILON
        let records: Vec<EvaluationRecord> = (0..20)
            .map(|i| {
                let truth = 1e-18 * (1.0 + 0.1 * i as f64);
                let close = truth * (1.0 + 0.01 * ((i % 3) as f64 + 1.0));
                let far = truth * (1.5 + 0.1 * ((i % 5) as f64));
                record(i, truth, vec![close, far])
            })
            .collect();
        let names = vec!["spectral".to_string(), "em".to_string()];

        let summary = analyze(&records, &names, 0.05).unwrap();
        let comparison = summary.comparison.unwrap();
        assert!(comparison.significance.is_significant);
        assert!(comparison.significance.t_statistic < 0.0);
    }

    // =========================================================================
    // Statistical helpers
    // =========================================================================

    #[test]
    fn test_compute_std() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = compute_std(&samples);
        assert!(std > 2.0 && std < 2.2, "std = {std}");
    }

    #[test]
    fn test_compute_std_single() {
        assert!(compute_std(&[5.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_paired_t_test_zero_variance() {
        let samples_a: Vec<f64> = vec![0.95; 10];
        let samples_b: Vec<f64> = vec![0.85; 10];
        assert!(paired_t_test(&samples_a, &samples_b, 0.05).is_none());
    }

    #[test]
    fn test_paired_t_test_identical_tiny_samples() {
        let samples = vec![3e-20, 1e-19, 7e-21];
        assert!(paired_t_test(&samples, &samples, 0.05).is_none());
    }

    #[test]
    fn test_paired_t_test_unequal_length() {
        assert!(paired_t_test(&[0.9, 0.91, 0.92], &[0.8, 0.81], 0.05).is_none());
    }

    #[test]
    fn test_cohens_d_interpretation() {
        assert_eq!(interpret_cohens_d(0.1), "negligible");
        assert_eq!(interpret_cohens_d(0.3), "small");
        assert_eq!(interpret_cohens_d(0.6), "medium");
        assert_eq!(interpret_cohens_d(1.0), "large");
        assert_eq!(interpret_cohens_d(-0.9), "large");
    }
}
