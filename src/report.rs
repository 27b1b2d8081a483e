//! Report generation for evaluation results.
//!
//! Produces three renderings of an [`Evaluation`]:
//! - a deterministic tab-separated text report (the primary artifact)
//! - a pretty-printed JSON document
//! - a console summary table
//!
//! The text report contains no timestamps and iterates in record order, so
//! identical evaluations render to identical bytes.

use crate::comparator::EvaluationRecord;
use crate::estimator::Hyperparameter;
use crate::metrics::DivergenceSummary;
use serde::Serialize;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use thiserror::Error;

/// Width of the separator lines around the column sums
const SEPARATOR_WIDTH: usize = 50;

/// Errors that can occur while writing a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize evaluation: {0}")]
    Json(#[from] serde_json::Error),
}

/// Estimator identity as shown in the report header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EstimatorInfo {
    /// Estimator name
    pub name: String,
    /// Hyperparameters in the estimator's fixed order
    pub hyperparameters: Vec<Hyperparameter>,
}

/// Complete result of one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Estimators in registration order; the first is the primary
    pub estimators: Vec<EstimatorInfo>,
    /// One record per test sequence, in test order
    pub records: Vec<EvaluationRecord>,
    /// Aggregate divergence figures
    pub summary: DivergenceSummary,
}

impl Evaluation {
    /// Estimator names in column order
    #[must_use]
    pub fn estimator_names(&self) -> Vec<String> {
        self.estimators.iter().map(|e| e.name.clone()).collect()
    }

    /// Render the tab-separated text report
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        for estimator in &self.estimators {
            let params: Vec<String> = estimator
                .hyperparameters
                .iter()
                .map(ToString::to_string)
                .collect();
            writeln!(output, "Estimator {}: {}", estimator.name, params.join(", ")).ok();
        }

        output.push_str("Model probability");
        for estimator in &self.estimators {
            write!(output, "\t{} probability", estimator.name).ok();
        }
        output.push_str("\tSequence\n");

        for record in &self.records {
            output.push_str(&sci(record.reference));
            for estimate in &record.estimates {
                write!(output, "\t{}", sci(*estimate)).ok();
            }
            writeln!(output, "\t{}", record.sequence).ok();
        }

        let separator = "-".repeat(SEPARATOR_WIDTH);
        writeln!(output, "{separator}").ok();
        output.push_str(&sci(self.summary.reference_sum));
        for estimator in &self.summary.estimators {
            write!(output, "\t{}", sci(estimator.probability_sum)).ok();
        }
        output.push('\n');
        writeln!(output, "{separator}").ok();

        for estimator in &self.summary.estimators {
            writeln!(
                output,
                "{} Kullback-Leibler Divergence: {:.6}",
                estimator.name, estimator.kl_divergence
            )
            .ok();
            writeln!(
                output,
                "{} mean absolute error: {}",
                estimator.name,
                sci(estimator.mean_absolute_error)
            )
            .ok();
        }

        if let Some(comparison) = &self.summary.comparison {
            let test = &comparison.significance;
            writeln!(
                output,
                "{} vs {} absolute error paired t-test: t={:.4}, p={:.4}, d={:.4} ({}){}",
                comparison.primary,
                comparison.secondary,
                test.t_statistic,
                test.p_value,
                test.cohens_d,
                test.effect_interpretation,
                if test.is_significant {
                    ", significant"
                } else {
                    ""
                }
            )
            .ok();
        }

        output
    }

    /// Render the evaluation as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render the per-estimator console summary
    #[must_use]
    pub fn summary_table(&self) -> String {
        let rows: Vec<SummaryTableRow> = self
            .summary
            .estimators
            .iter()
            .zip(&self.estimators)
            .map(|(summary, info)| SummaryTableRow {
                estimator: summary.name.clone(),
                hyperparameters: info
                    .hyperparameters
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                kl_divergence: format!("{:.6}", summary.kl_divergence),
                mean_absolute_error: sci(summary.mean_absolute_error),
                probability_sum: sci(summary.probability_sum),
            })
            .collect();

        Table::new(rows).to_string()
    }

    /// Write the text report to `path`
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Io` if the file cannot be created or written.
    pub fn write_text<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        write_file(path.as_ref(), self.to_text().as_bytes())
    }

    /// Write the text report and, optionally, the JSON rendering
    ///
    /// JSON is serialized before anything touches the disk, and the text
    /// report is removed again if the JSON file cannot be written, so a
    /// failure leaves no report behind.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or either write fails.
    pub fn write_reports(
        &self,
        text_path: &Path,
        json_path: Option<&Path>,
    ) -> Result<(), ReportError> {
        let json = json_path
            .map(|path| self.to_json().map(|json| (path, json)))
            .transpose()?;

        write_file(text_path, self.to_text().as_bytes())?;
        if let Some((path, json)) = json {
            if let Err(e) = write_file(path, json.as_bytes()) {
                if let Err(cleanup) = std::fs::remove_file(text_path) {
                    tracing::warn!(
                        path = %text_path.display(),
                        error = %cleanup,
                        "Failed to remove partial report"
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Table row for console output
#[derive(Tabled)]
struct SummaryTableRow {
    #[tabled(rename = "Estimator")]
    estimator: String,
    #[tabled(rename = "Hyperparameters")]
    hyperparameters: String,
    #[tabled(rename = "KL divergence")]
    kl_divergence: String,
    #[tabled(rename = "Mean abs. error")]
    mean_absolute_error: String,
    #[tabled(rename = "Probability sum")]
    probability_sum: String,
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ReportError> {
    let io_error = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    writer.write_all(contents).map_err(io_error)?;
    writer.flush().map_err(io_error)?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "Wrote report");
    Ok(())
}

/// Format like C's `%e`: six fraction digits and a signed, two-digit exponent
#[must_use]
pub fn sci(value: f64) -> String {
    let formatted = format!("{value:.6e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return formatted;
    };
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}
