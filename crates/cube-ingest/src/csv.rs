//! CSV reading and writing through polars.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use cube_model::Table;
use polars::prelude::*;

use crate::error::{IngestError, Result};
use crate::frame::table_from_frame;

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => IngestError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => IngestError::FileRead {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Encoding named by a non-UTF-8 byte order mark at the start of `head`.
fn foreign_bom(head: &[u8]) -> Option<&'static str> {
    match head {
        [0xFF, 0xFE, 0, 0, ..] => Some("UTF-32LE"),
        [0, 0, 0xFE, 0xFF, ..] => Some("UTF-32BE"),
        [0xFF, 0xFE, ..] => Some("UTF-16LE"),
        [0xFE, 0xFF, ..] => Some("UTF-16BE"),
        _ => None,
    }
}

/// Reject files that start with a UTF-16 or UTF-32 byte order mark.
///
/// A UTF-8 BOM is accepted; polars skips it.
pub fn validate_encoding(path: &Path) -> Result<()> {
    let mut head = Vec::with_capacity(4);
    open(path)?
        .take(4)
        .read_to_end(&mut head)
        .map_err(|source| IngestError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    match foreign_bom(&head) {
        Some(encoding) => Err(IngestError::UnsupportedEncoding {
            path: path.to_path_buf(),
            encoding,
        }),
        None => Ok(()),
    }
}

/// Read a panel CSV (one header row) into a DataFrame.
///
/// ISO-8601 date and datetime columns come back as temporal columns so they
/// can serve as a time index.
pub fn read_csv_frame(path: &Path) -> Result<DataFrame> {
    validate_encoding(path)?;
    let malformed = |e: PolarsError| IngestError::CsvParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .map_parse_options(|opts| opts.with_try_parse_dates(true))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(malformed)?;

    if df.height() == 0 {
        return Err(IngestError::EmptyCsv {
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(path = %path.display(), rows = df.height(), columns = df.width(), "read CSV");
    Ok(df)
}

/// Read a CSV file straight into a flat [`Table`].
pub fn read_csv_table(path: &Path) -> Result<Table> {
    let df = read_csv_frame(path)?;
    table_from_frame(&df)
}

/// Write a DataFrame as CSV with a header row.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path).map_err(|source| IngestError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)?;
    tracing::debug!(path = %path.display(), rows = df.height(), "wrote CSV");
    Ok(())
}
