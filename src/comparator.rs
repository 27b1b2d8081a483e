//! Per-sequence probability comparison.
//!
//! Queries the reference model and every estimator for each test sequence
//! and assembles one [`EvaluationRecord`] per sequence, in test order.

use crate::dataset::{Dataset, ObservationSequence};
use crate::estimator::{Estimator, EstimatorError};
use crate::hmm::{ModelError, ReferenceModel};
use serde::Serialize;
use thiserror::Error;

/// Errors that abort a comparison run
#[derive(Error, Debug)]
pub enum CompareError {
    #[error("Reference model failed on test sequence {index}: {source}")]
    Reference {
        index: usize,
        #[source]
        source: ModelError,
    },

    #[error("Estimator `{estimator}` failed on test sequence {index}: {source}")]
    Estimator {
        index: usize,
        estimator: String,
        #[source]
        source: EstimatorError,
    },
}

/// Aligned probabilities for one test sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    /// Position in the test dataset
    pub index: usize,
    /// Probability under the reference model
    pub reference: f64,
    /// Estimated probabilities, one per estimator in registration order
    pub estimates: Vec<f64>,
    /// Number of observations in the sequence
    pub length: usize,
    /// The sequence itself
    pub sequence: ObservationSequence,
}

impl EvaluationRecord {
    /// Primary estimator's probability
    #[must_use]
    pub fn primary(&self) -> Option<f64> {
        self.estimates.first().copied()
    }

    /// Secondary estimator's probability, when one is configured
    #[must_use]
    pub fn secondary(&self) -> Option<f64> {
        self.estimates.get(1).copied()
    }
}

/// Score every test sequence with the reference model and each estimator
///
/// The returned records have exactly `test.len()` entries in test order.
///
/// # Errors
///
/// Returns the first failing query; no partial record set is returned.
pub fn compare(
    reference: &dyn ReferenceModel,
    estimators: &[Box<dyn Estimator>],
    test: &Dataset,
) -> Result<Vec<EvaluationRecord>, CompareError> {
    let mut records = Vec::with_capacity(test.len());

    for (index, sequence) in test.iter().enumerate() {
        let reference_probability = reference
            .probability(sequence)
            .map_err(|source| CompareError::Reference { index, source })?;

        let estimates = estimators
            .iter()
            .map(|estimator| {
                estimator
                    .predict(sequence)
                    .map_err(|source| CompareError::Estimator {
                        index,
                        estimator: estimator.name().to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        records.push(EvaluationRecord {
            index,
            reference: reference_probability,
            estimates,
            length: sequence.len(),
            sequence: sequence.clone(),
        });
    }

    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
pub(crate) mod tests {
    use super::*;
    use crate::estimator::{EstimatorState, Hyperparameter};
    use std::collections::HashMap;

    /// Reference model answering from a lookup table
    pub struct TableModel(pub HashMap<Vec<u32>, f64>);

    impl ReferenceModel for TableModel {
        fn probability(&self, sequence: &ObservationSequence) -> Result<f64, ModelError> {
            self.0
                .get(sequence.symbols())
                .copied()
                .ok_or_else(|| ModelError::Query(format!("no entry for {sequence}")))
        }
    }

    /// Estimator answering a constant once trained
    pub struct ConstantEstimator {
        pub name: &'static str,
        pub value: f64,
        pub trained: bool,
    }

    impl Estimator for ConstantEstimator {
        fn name(&self) -> &str {
            self.name
        }

        fn state(&self) -> EstimatorState {
            if self.trained {
                EstimatorState::Trained
            } else {
                EstimatorState::Untrained
            }
        }

        fn train(&mut self, _dataset: &Dataset) -> Result<(), EstimatorError> {
            self.trained = true;
            Ok(())
        }

        fn predict(&self, _sequence: &ObservationSequence) -> Result<f64, EstimatorError> {
            if self.trained {
                Ok(self.value)
            } else {
                Err(EstimatorError::Untrained(self.name.to_string()))
            }
        }

        fn hyperparameters(&self) -> Vec<Hyperparameter> {
            vec![Hyperparameter::new("value", self.value)]
        }
    }

    pub fn constant(name: &'static str, value: f64) -> Box<dyn Estimator> {
        Box::new(ConstantEstimator {
            name,
            value,
            trained: true,
        })
    }

    pub fn table(entries: Vec<(Vec<u32>, f64)>) -> TableModel {
        TableModel(entries.into_iter().collect())
    }

    #[test]
    fn test_records_follow_test_order() {
        let test = Dataset::from_csv_str("2,2\n0\n1,0,1\n").unwrap();
        let reference = table(vec![(vec![2, 2], 0.1), (vec![0], 0.5), (vec![1, 0, 1], 0.02)]);
        let estimators = vec![constant("spectral", 0.3)];

        let records = compare(&reference, &estimators, &test).unwrap();

        assert_eq!(records.len(), test.len());
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.index, i);
            assert_eq!(&record.sequence, test.get(i).unwrap());
            assert_eq!(record.length, record.sequence.len());
        }
        assert_eq!(records[0].reference, 0.1);
        assert_eq!(records[2].reference, 0.02);
        assert_eq!(records[1].primary(), Some(0.3));
        assert_eq!(records[1].secondary(), None);
    }

    #[test]
    fn test_estimates_align_with_estimators() {
        let test = Dataset::from_csv_str("1,2,3\n").unwrap();
        let reference = table(vec![(vec![1, 2, 3], 0.04)]);
        let estimators = vec![constant("spectral", 0.05), constant("em", 0.03)];

        let records = compare(&reference, &estimators, &test).unwrap();
        assert_eq!(records[0].estimates, vec![0.05, 0.03]);
        assert_eq!(records[0].secondary(), Some(0.03));
    }

    #[test]
    fn test_reference_failure_aborts_run() {
        let test = Dataset::from_csv_str("1\n9\n").unwrap();
        let reference = table(vec![(vec![1], 0.5)]);
        let estimators = vec![constant("spectral", 0.5)];

        let result = compare(&reference, &estimators, &test);
        assert!(matches!(result, Err(CompareError::Reference { index: 1, .. })));
    }

    #[test]
    fn test_untrained_estimator_aborts_run() {
        let test = Dataset::from_csv_str("1\n").unwrap();
        let reference = table(vec![(vec![1], 0.5)]);
        let estimators: Vec<Box<dyn Estimator>> = vec![Box::new(ConstantEstimator {
            name: "spectral",
            value: 0.5,
            trained: false,
        })];

        let err = compare(&reference, &estimators, &test).unwrap_err();
        match err {
            CompareError::Estimator {
                index,
                estimator,
                source,
            } => {
                assert_eq!(index, 0);
                assert_eq!(estimator, "spectral");
                assert!(matches!(source, EstimatorError::Untrained(_)));
            }
            CompareError::Reference { .. } => panic!("expected estimator failure"),
        }
    }

    #[test]
    fn test_empty_test_set() {
        let reference = table(vec![]);
        let estimators = vec![constant("spectral", 0.5)];
        let records = compare(&reference, &estimators, &Dataset::default()).unwrap();
        assert!(records.is_empty());
    }
}
