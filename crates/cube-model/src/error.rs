//! Error types for cube construction, conversion and matching.

use thiserror::Error;

/// Errors raised by cube operations.
///
/// Every operation returns these synchronously to its caller; nothing is
/// retried internally. Partial matches are not errors and never show up here.
#[derive(Debug, Error)]
pub enum CubeError {
    // === Schema Errors ===
    /// A key, index or coordinate column was not supplied or cannot be resolved.
    #[error("missing required {role} field '{field}'")]
    MissingRequiredField { field: String, role: &'static str },

    /// Column not found in a table or dataset.
    #[error("column '{column}' not found")]
    ColumnNotFound { column: String },

    /// The same column name appears twice in one table.
    #[error("duplicate column '{column}'")]
    DuplicateColumn { column: String },

    /// Row length does not match the column count.
    #[error("row length mismatch: expected {expected}, got {actual}")]
    RowLengthMismatch { expected: usize, actual: usize },

    // === Shape Errors ===
    /// Sibling `ts` tables disagree on their columns, or two series cannot be compared.
    #[error("shape mismatch: {message}")]
    ShapeMismatch { message: String },

    /// Too many list-valued columns to decide which one holds the time series.
    #[error("cannot decide the nested column among {}", columns.join(", "))]
    TooManyGroupingColumns { columns: Vec<String> },

    // === Key Errors ===
    /// A key appears more than once where keys must be unique.
    #[error("duplicate key {key}")]
    DuplicateKey { key: String },

    /// An observation `(key, index)` appears more than once.
    #[error("duplicate observation for key {key} at index {index}")]
    DuplicateObservation { key: String, index: String },

    /// Two inputs share no key and no fallback mapping was given.
    #[error("unmatched key: {message}")]
    UnmatchedKey { message: String },

    /// Long observations and the spatial sidecar disagree on their key sets.
    #[error(
        "sidecar does not line up with observations: {missing_in_sidecar} key(s) missing from the sidecar, {missing_in_long} key(s) without observations"
    )]
    UnmatchedSidecar {
        missing_in_sidecar: usize,
        missing_in_long: usize,
    },

    // === Attribute Errors ===
    /// The attribute exists but is not invariant (or does not exist at all).
    #[error("'{column}' is not an invariant attribute")]
    NotInvariant { column: String },

    /// A coordinate column changes value within one key.
    #[error("coordinate '{column}' varies within key {key}")]
    VaryingCoordinate { column: String, key: String },

    /// A value cannot be used for the requested purpose.
    #[error("invalid value '{value}' in '{column}': expected {expected}")]
    InvalidValue {
        column: String,
        value: String,
        expected: &'static str,
    },

    // === Option Errors ===
    /// Out-of-range or unrecognized configuration value.
    #[error("invalid option {option} = {value}: {reason}")]
    InvalidOption {
        option: &'static str,
        value: String,
        reason: String,
    },

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    // === External Errors ===
    /// Failed DataFrame operation.
    #[error("DataFrame operation failed: {message}")]
    DataFrame { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CubeError {
    /// Shorthand for an [`CubeError::InvalidOption`].
    pub fn invalid_option(
        option: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOption {
            option,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`CubeError::ShapeMismatch`].
    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            message: message.into(),
        }
    }
}

impl From<polars::prelude::PolarsError> for CubeError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        Self::DataFrame {
            message: err.to_string(),
        }
    }
}

/// Result type for cube operations.
pub type Result<T> = std::result::Result<T, CubeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CubeError::MissingRequiredField {
            field: "long".to_string(),
            role: "coordinate",
        };
        assert_eq!(err.to_string(), "missing required coordinate field 'long'");

        let err = CubeError::TooManyGroupingColumns {
            columns: vec!["ts".to_string(), "extra".to_string()],
        };
        assert_eq!(err.to_string(), "cannot decide the nested column among ts, extra");
    }

    #[test]
    fn test_error_from_polars() {
        let polars_err = polars::prelude::PolarsError::ColumnNotFound("test".into());
        let err: CubeError = polars_err.into();
        assert!(matches!(err, CubeError::DataFrame { .. }));
    }
}
