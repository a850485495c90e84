//! Tabular data for supervised models.
//!
//! A [`Dataset`] pairs an evidence matrix, one row per observation and one
//! column per feature, with a response vector holding one label per row.
//! Datasets are read from *comma-separated values* through a
//! [`TabularLoader`], which is configured with builder methods:
//!
//! ```rust
//! use gradwalk::data::TabularLoader;
//!
//! let csv_content = "\
//!     height;weight;label\n\
//!     1.0;2.0;1\n\
//!     -1.0;0.5;0";
//!
//! let dataset = TabularLoader::default()
//!     .with_delimiter(';')
//!     .with_intercept()
//!     .from_reader(csv_content.as_bytes())
//!     .unwrap();
//!
//! assert_eq!(dataset.evidence().shape(), &[2, 3]);
//! assert_eq!(dataset.response().data(), &[1., 0.]);
//! ```

use crate::error::AutogradError;
use crate::tensor::{Scalar, Tensor};
use csv::{Reader, ReaderBuilder, Trim};
use log::debug;
use rand::Rng;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("row {row}, column {column}: cannot parse {text:?} as a number")]
    Parse {
        row: usize,
        column: usize,
        text: String,
    },

    #[error("row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("response column {column} is out of range for {columns} columns")]
    ResponseColumn { column: usize, columns: usize },

    #[error("no observations found")]
    Empty,

    #[error(transparent)]
    Tensor(#[from] AutogradError),
}

/// Evidence matrix and response vector with matching row counts.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    evidence: Tensor,
    response: Tensor,
}

impl Dataset {
    pub fn new(evidence: Tensor, response: Tensor) -> Result<Self, AutogradError> {
        match (evidence.shape(), response.shape()) {
            ([rows, _], [labels]) if rows == labels => Ok(Self { evidence, response }),
            (lhs, rhs) => Err(AutogradError::IncompatibleShapes {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
                operation: "dataset".to_string(),
            }),
        }
    }

    /// Observations with features uniform in `[-1, 1)`, labelled `1` when
    /// they fall on the positive side of the hyperplane `x · weights = 0`.
    pub fn synthetic(
        rng: &mut impl Rng,
        rows: usize,
        weights: &[Scalar],
    ) -> Result<Self, AutogradError> {
        let mut evidence = Vec::with_capacity(rows * weights.len());
        let mut response = Vec::with_capacity(rows);
        for _ in 0..rows {
            let row: Vec<Scalar> = weights.iter().map(|_| rng.gen_range(-1.0..1.0)).collect();
            let side: Scalar = row.iter().zip(weights).map(|(x, w)| x * w).sum();
            response.push(if side > 0. { 1. } else { 0. });
            evidence.extend(row);
        }

        Self::new(
            Tensor::matrix(rows, weights.len(), evidence)?,
            Tensor::vector(response),
        )
    }

    pub fn evidence(&self) -> &Tensor {
        &self.evidence
    }

    pub fn response(&self) -> &Tensor {
        &self.response
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    pub fn features(&self) -> usize {
        self.evidence.shape()[1]
    }

    /// Splits off the leading `fraction` of the rows, e.g. into a training
    /// and a test set.
    pub fn split(&self, fraction: Scalar) -> Result<(Dataset, Dataset), AutogradError> {
        let rows = self.len();
        let head = ((rows as Scalar * fraction).round() as usize).min(rows);
        let part = |start, end| {
            Self::new(
                self.evidence.slice_rows(start, end)?,
                self.response.slice_rows(start, end)?,
            )
        };

        Ok((part(0, head)?, part(head, rows)?))
    }
}

/// Reads a [`Dataset`] from delimited text.
///
/// By default the input has a header line, fields are separated by commas and
/// the response is the last column. Every other column becomes a feature.
#[derive(Clone, Debug)]
pub struct TabularLoader {
    delimiter: u8,
    has_headers: bool,
    response_column: Option<usize>,
    intercept: bool,
}

impl Default for TabularLoader {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
            response_column: None,
            intercept: false,
        }
    }
}

impl TabularLoader {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter as u8;
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.has_headers = false;
        self
    }

    /// Zero-based index of the column holding the labels.
    pub fn with_response_column(mut self, column: usize) -> Self {
        self.response_column = Some(column);
        self
    }

    /// Prepends a constant feature of ones, giving linear models a bias term.
    pub fn with_intercept(mut self) -> Self {
        self.intercept = true;
        self
    }

    pub fn from_path(&self, src: impl AsRef<Path>) -> Result<Dataset, DataError> {
        let reader = self.reader_builder().from_path(src)?;
        self.load(reader)
    }

    pub fn from_reader<R: Read>(&self, src: R) -> Result<Dataset, DataError> {
        let reader = self.reader_builder().from_reader(src);
        self.load(reader)
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .flexible(true)
            .trim(Trim::All);
        builder
    }

    fn load<R: Read>(&self, mut reader: Reader<R>) -> Result<Dataset, DataError> {
        let mut evidence = Vec::new();
        let mut response = Vec::new();
        let mut width = None;

        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let row = index + 1;
            let expected = *width.get_or_insert(record.len());
            if record.len() != expected {
                return Err(DataError::Ragged {
                    row,
                    expected,
                    found: record.len(),
                });
            }

            let target = self.response_column.unwrap_or(expected.saturating_sub(1));
            if target >= expected {
                return Err(DataError::ResponseColumn {
                    column: target,
                    columns: expected,
                });
            }

            if self.intercept {
                evidence.push(1.);
            }
            for (column, cell) in record.iter().enumerate() {
                let value = cell.parse::<Scalar>().map_err(|_| DataError::Parse {
                    row,
                    column,
                    text: cell.to_string(),
                })?;
                if column == target {
                    response.push(value);
                } else {
                    evidence.push(value);
                }
            }
        }

        let rows = response.len();
        if rows == 0 {
            return Err(DataError::Empty);
        }
        let features = evidence.len() / rows;
        debug!("loaded {} observations with {} features", rows, features);

        Ok(Dataset::new(
            Tensor::matrix(rows, features, evidence)?,
            Tensor::vector(response),
        )?)
    }
}
