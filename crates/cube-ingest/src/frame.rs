//! Conversion between polars DataFrames and cube tables.

use std::collections::HashMap;

use cube_common::{any_to_value, values_to_column};
use cube_model::{CubeError, CubeSchema, LongDataset, NestedDataset, Site, Table, Value};
use polars::prelude::*;

use crate::error::{IngestError, Result};

/// Copy a flat DataFrame into a [`Table`], cell by cell.
pub fn table_from_frame(df: &DataFrame) -> Result<Table> {
    let mut columns = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        let mut values = Vec::with_capacity(df.height());
        for row_idx in 0..df.height() {
            values.push(any_to_value(col.get(row_idx)?));
        }
        columns.push((col.name().to_string(), values));
    }
    Ok(Table::from_columns(columns)?)
}

/// Build a DataFrame from a [`Table`]; each column takes the supertype of its cells.
pub fn table_to_frame(table: &Table) -> Result<DataFrame> {
    let columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| values_to_column(name, table.rows().iter().map(|row| &row[idx])))
        .collect::<PolarsResult<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Export a long dataset as `(observations, sidecar)` frames.
pub fn long_to_frames(long: &LongDataset) -> Result<(DataFrame, DataFrame)> {
    let observations = table_to_frame(long.observations())?;
    let sidecar = table_to_frame(&long.sidecar().to_table()?)?;
    Ok((observations, sidecar))
}

/// Read a frame that already holds one row per site.
///
/// Exactly one column must be a list of structs; its struct fields become the
/// `ts` columns (index first) and every other column is an invariant
/// attribute. A null list is an empty series.
pub fn nested_from_frame(df: &DataFrame, schema: &CubeSchema) -> Result<NestedDataset> {
    let list_columns: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|col| matches!(col.dtype(), DataType::List(_)))
        .collect();
    let ts_col = match list_columns.as_slice() {
        [single] => *single,
        [] => {
            return Err(CubeError::shape("frame has no list column to nest").into());
        }
        many => {
            return Err(CubeError::TooManyGroupingColumns {
                columns: many.iter().map(|col| col.name().to_string()).collect(),
            }
            .into());
        }
    };
    let ts_columns = struct_fields(ts_col)?;
    let ts_columns = index_first(ts_columns, schema.index())?;

    let key_col = df
        .column(schema.key())
        .map_err(|_| CubeError::MissingRequiredField {
            field: schema.key().to_string(),
            role: "key",
        })?;
    let attribute_cols: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|col| col.name() != ts_col.name() && col.name().as_str() != schema.key())
        .collect();
    let spatial_columns: Vec<String> = attribute_cols
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let mut sites = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let key = any_to_value(key_col.get(row_idx)?);
        let attributes = attribute_cols
            .iter()
            .map(|col| col.get(row_idx).map(any_to_value))
            .collect::<PolarsResult<Vec<_>>>()?;
        let ts = match ts_col.get(row_idx)? {
            AnyValue::List(items) => series_table(&items, &ts_columns)?,
            AnyValue::Null => Table::new(ts_columns.iter().cloned())?,
            other => {
                return Err(IngestError::NotNested {
                    column: ts_col.name().to_string(),
                    dtype: other.dtype().to_string(),
                });
            }
        };
        sites.push(Site::series(key, attributes, ts));
    }
    tracing::debug!(
        sites = sites.len(),
        ts = %ts_col.name(),
        "read nested frame"
    );
    Ok(NestedDataset::new(schema.clone(), spatial_columns, sites)?)
}

fn struct_fields(col: &Column) -> Result<Vec<String>> {
    if let DataType::List(inner) = col.dtype()
        && let DataType::Struct(fields) = inner.as_ref()
    {
        return Ok(fields.iter().map(|f| f.name().to_string()).collect());
    }
    Err(IngestError::NotNested {
        column: col.name().to_string(),
        dtype: col.dtype().to_string(),
    })
}

fn index_first(mut columns: Vec<String>, index: &str) -> Result<Vec<String>> {
    let pos = columns
        .iter()
        .position(|c| c == index)
        .ok_or_else(|| CubeError::MissingRequiredField {
            field: index.to_string(),
            role: "index",
        })?;
    let index = columns.remove(pos);
    columns.insert(0, index);
    Ok(columns)
}

fn series_table(items: &Series, columns: &[String]) -> Result<Table> {
    let fields: HashMap<String, Series> = items
        .struct_()?
        .fields_as_series()
        .into_iter()
        .map(|s| (s.name().to_string(), s))
        .collect();
    let mut table = Table::new(columns.iter().cloned())?;
    for row_idx in 0..items.len() {
        let row = columns
            .iter()
            .map(|name| match fields.get(name) {
                Some(series) => series.get(row_idx).map(any_to_value),
                None => Ok(Value::Null),
            })
            .collect::<PolarsResult<Vec<_>>>()?;
        table.push_row(row)?;
    }
    Ok(table)
}
