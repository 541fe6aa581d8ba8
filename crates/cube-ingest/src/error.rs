//! Errors raised while moving cubes in and out of files and frames.

use std::path::PathBuf;

use cube_model::CubeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    // === Files ===
    #[error("no panel file at {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === CSV ===
    /// A UTF-16 or UTF-32 byte order mark; panels must be UTF-8.
    #[error("{path} is {encoding}, expected UTF-8")]
    UnsupportedEncoding {
        path: PathBuf,
        encoding: &'static str,
    },

    #[error("malformed CSV in {path}: {message}")]
    CsvParse { path: PathBuf, message: String },

    /// Header only, no observations.
    #[error("{path} has no rows")]
    EmptyCsv { path: PathBuf },

    // === Frames ===
    /// The nested column of a frame must be a list of structs.
    #[error("column '{column}' is {dtype}, expected a list of structs")]
    NotNested { column: String, dtype: String },

    /// Invalid cube, including polars failures while reshaping frames.
    #[error(transparent)]
    Cube(#[from] CubeError),
}

impl From<polars::prelude::PolarsError> for IngestError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        Self::Cube(err.into())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_name_the_path() {
        let err = IngestError::FileNotFound {
            path: PathBuf::from("/data/stations.csv"),
        };
        assert_eq!(err.to_string(), "no panel file at /data/stations.csv");

        let err = IngestError::UnsupportedEncoding {
            path: PathBuf::from("rain.csv"),
            encoding: "UTF-16LE",
        };
        assert_eq!(err.to_string(), "rain.csv is UTF-16LE, expected UTF-8");
    }

    #[test]
    fn cube_errors_pass_through() {
        let err: IngestError = CubeError::TooManyGroupingColumns {
            columns: vec!["ts".to_string(), "tags".to_string()],
        }
        .into();
        assert_eq!(err.to_string(), "cannot decide the nested column among ts, tags");
    }

    #[test]
    fn polars_errors_become_cube_errors() {
        let err: IngestError = polars::prelude::PolarsError::ColumnNotFound("tmax".into()).into();
        assert!(matches!(err, IngestError::Cube(CubeError::DataFrame { .. })));
    }
}
