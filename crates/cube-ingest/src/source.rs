//! Tagged union of the inputs a cube can be built from.

use std::path::PathBuf;

use cube_model::{CubeSchema, NestedDataset, Table};
use cube_transform::as_nested;
use polars::prelude::DataFrame;

use crate::csv::read_csv_table;
use crate::error::Result;
use crate::frame::{nested_from_frame, table_from_frame};

/// Where cube data comes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// A flat table, one row per observation.
    Table(Table),
    /// A flat polars frame, one row per observation.
    Frame(DataFrame),
    /// A polars frame with one row per site and a list-of-struct series column.
    NestedFrame(DataFrame),
    /// A flat CSV file, one row per observation.
    Csv(PathBuf),
}

impl Source {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Table(_) => "table",
            Source::Frame(_) => "frame",
            Source::NestedFrame(_) => "nested frame",
            Source::Csv(_) => "csv",
        }
    }
}

impl From<Table> for Source {
    fn from(table: Table) -> Self {
        Source::Table(table)
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Csv(path)
    }
}

/// Build the nested form of `source` under `schema`.
///
/// Flat inputs go through [`as_nested`], which classifies invariant and
/// variant columns; nested frames are taken as they are.
pub fn load_nested(source: Source, schema: &CubeSchema) -> Result<NestedDataset> {
    let kind = source.kind();
    let nested = match source {
        Source::Table(table) => as_nested(&table, schema)?,
        Source::Frame(df) => as_nested(&table_from_frame(&df)?, schema)?,
        Source::NestedFrame(df) => nested_from_frame(&df, schema)?,
        Source::Csv(path) => as_nested(&read_csv_table(&path)?, schema)?,
    };
    tracing::info!(
        source = kind,
        sites = nested.len(),
        observations = nested.observation_count(),
        "loaded cube"
    );
    Ok(nested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_model::{Coordinates, CubeError, Value};
    use polars::prelude::*;

    use crate::error::IngestError;

    fn schema() -> CubeSchema {
        CubeSchema::new("id", "date", Coordinates::default())
    }

    #[test]
    fn test_table_and_frame_agree() {
        let df = DataFrame::new(vec![
            Series::new("id".into(), vec!["A", "A", "B"]).into_column(),
            Series::new("date".into(), vec![2i64, 1, 1]).into_column(),
            Series::new("long".into(), vec![1.0, 1.0, 2.0]).into_column(),
            Series::new("lat".into(), vec![3.0, 3.0, 4.0]).into_column(),
            Series::new("tmax".into(), vec![20.0, 19.0, 25.0]).into_column(),
        ])
        .unwrap();
        let table = table_from_frame(&df).unwrap();

        let from_frame = load_nested(Source::Frame(df), &schema()).unwrap();
        let from_table = load_nested(table.into(), &schema()).unwrap();
        assert_eq!(from_frame, from_table);
        assert_eq!(from_frame.len(), 2);
        let ts = from_frame.site(&Value::from("A")).unwrap().ts().unwrap();
        assert_eq!(ts.rows()[0][0], Value::Int(1));
    }

    #[test]
    fn test_missing_coordinates() {
        let table = Table::with_rows(
            ["id", "date"],
            vec![vec![Value::from("A"), Value::Int(1)]],
        )
        .unwrap();

        let err = load_nested(Source::Table(table), &schema()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Cube(CubeError::MissingRequiredField {
                role: "coordinate",
                ..
            })
        ));
    }
}
