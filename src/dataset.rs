//! Dataset loading for observation-sequence evaluation.
//!
//! Each line of a dataset source is one observation sequence written as a
//! comma-separated row of non-negative integer symbol codes, without a
//! header row. Loading is atomic: a single malformed token rejects the whole
//! source and no partial dataset is returned.

#![allow(clippy::missing_const_for_fn)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during dataset loading
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dataset file not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed dataset row at line {line}: {message}")]
    Format { line: u64, message: String },

    #[error("Unreadable dataset source: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// An ordered sequence of observed symbol codes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationSequence(Vec<u32>);

impl ObservationSequence {
    /// Wrap a vector of symbol codes
    #[must_use]
    pub fn new(symbols: Vec<u32>) -> Self {
        Self(symbols)
    }

    /// Symbol codes in observation order
    #[must_use]
    pub fn symbols(&self) -> &[u32] {
        &self.0
    }

    /// Number of observations
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the sequence has no observations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over symbol codes
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// Largest symbol code, if any
    #[must_use]
    pub fn max_symbol(&self) -> Option<u32> {
        self.0.iter().copied().max()
    }
}

impl From<Vec<u32>> for ObservationSequence {
    fn from(symbols: Vec<u32>) -> Self {
        Self(symbols)
    }
}

impl fmt::Display for ObservationSequence {
    /// Renders the sequence exactly as a dataset row (`1,2,3`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, symbol) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{symbol}")?;
        }
        Ok(())
    }
}

/// An ordered, immutable collection of observation sequences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    sequences: Vec<ObservationSequence>,
}

impl Dataset {
    /// Load a dataset from a delimited text file
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::NotFound` if the file doesn't exist and
    /// `DatasetError::Format` if any row contains a token that is not a
    /// non-negative integer.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let dataset = Self::from_reader(file)?;

        tracing::debug!(
            path = %path.display(),
            sequences = dataset.len(),
            "Loaded dataset"
        );

        Ok(dataset)
    }

    /// Parse a dataset from any reader
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::Format` on the first malformed token.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut sequences = Vec::new();

        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, csv::Position::line);

            if record.len() == 1 && record.get(0).is_some_and(str::is_empty) {
                continue;
            }

            let symbols = record
                .iter()
                .map(|token| parse_symbol(token, line))
                .collect::<Result<Vec<_>, _>>()?;

            sequences.push(ObservationSequence(symbols));
        }

        Ok(Self { sequences })
    }

    /// Parse a dataset from an in-memory string
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::Format` on the first malformed token.
    pub fn from_csv_str(text: &str) -> Result<Self, DatasetError> {
        Self::from_reader(text.as_bytes())
    }

    /// Render the dataset as delimited text, one `\n`-terminated row per sequence
    ///
    /// Empty sequences render as blank lines, which are skipped when the text
    /// is parsed again.
    #[must_use]
    pub fn to_csv_string(&self) -> String {
        let mut output = String::new();
        for sequence in &self.sequences {
            output.push_str(&sequence.to_string());
            output.push('\n');
        }
        output
    }

    /// Write the dataset to a delimited text file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DatasetError> {
        std::fs::write(path, self.to_csv_string())?;
        Ok(())
    }

    /// Get total number of sequences
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Check if the dataset is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Get a sequence by position
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ObservationSequence> {
        self.sequences.get(index)
    }

    /// Get iterator over sequences in dataset order
    pub fn iter(&self) -> impl Iterator<Item = &ObservationSequence> {
        self.sequences.iter()
    }

    /// Sequences as a slice
    #[must_use]
    pub fn sequences(&self) -> &[ObservationSequence] {
        &self.sequences
    }

    /// Number of distinct symbol codes implied by the data (largest code + 1)
    #[must_use]
    pub fn alphabet_size(&self) -> usize {
        self.sequences
            .iter()
            .filter_map(ObservationSequence::max_symbol)
            .max()
            .map_or(0, |max| max as usize + 1)
    }

    /// Compute statistics about the dataset
    #[must_use]
    pub fn stats(&self) -> DatasetStats {
        let lengths = self.sequences.iter().map(ObservationSequence::len);

        DatasetStats {
            sequences: self.sequences.len(),
            total_symbols: lengths.clone().sum(),
            min_length: lengths.clone().min().unwrap_or(0),
            max_length: lengths.max().unwrap_or(0),
            alphabet_size: self.alphabet_size(),
        }
    }
}

impl From<Vec<ObservationSequence>> for Dataset {
    fn from(sequences: Vec<ObservationSequence>) -> Self {
        Self { sequences }
    }
}

impl FromIterator<ObservationSequence> for Dataset {
    fn from_iter<I: IntoIterator<Item = ObservationSequence>>(iter: I) -> Self {
        Self {
            sequences: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a ObservationSequence;
    type IntoIter = std::slice::Iter<'a, ObservationSequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}

/// Statistics about a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Number of sequences
    pub sequences: usize,
    /// Sum of all sequence lengths
    pub total_symbols: usize,
    /// Shortest sequence length
    pub min_length: usize,
    /// Longest sequence length
    pub max_length: usize,
    /// Largest symbol code + 1
    pub alphabet_size: usize,
}

fn parse_symbol(token: &str, line: u64) -> Result<u32, DatasetError> {
    if token.is_empty() {
        return Err(DatasetError::Format {
            line,
            message: "empty token".to_string(),
        });
    }

    token.parse::<u32>().map_err(|_| DatasetError::Format {
        line,
        message: format!("expected a non-negative integer, found `{token}`"),
    })
}
