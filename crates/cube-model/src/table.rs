//! Flat, row-oriented tables.

use serde::{Deserialize, Serialize};

use crate::error::{CubeError, Result};
use crate::value::Value;

/// A flat table with named columns.
///
/// Used for raw input, for the nested `ts` sub-tables and for long-form
/// observations. Column names are unique and every row has one value per
/// column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        for (pos, name) in columns.iter().enumerate() {
            if columns[..pos].contains(name) {
                return Err(CubeError::DuplicateColumn {
                    column: name.clone(),
                });
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Create a table and fill it with rows.
    pub fn with_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from named column vectors of equal length.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self> {
        let height = columns.first().map_or(0, |(_, values)| values.len());
        let mut names = Vec::with_capacity(columns.len());
        let mut data: Vec<std::vec::IntoIter<Value>> = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != height {
                return Err(CubeError::RowLengthMismatch {
                    expected: height,
                    actual: values.len(),
                });
            }
            names.push(name);
            data.push(values.into_iter());
        }
        let mut table = Self::new(names)?;
        for _ in 0..height {
            let row = data.iter_mut().filter_map(Iterator::next).collect();
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(CubeError::RowLengthMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of a column, or [`CubeError::ColumnNotFound`].
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| CubeError::ColumnNotFound {
                column: name.to_string(),
            })
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// New table holding only the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Table> {
        let indices = names
            .iter()
            .map(|name| self.require_column(name))
            .collect::<Result<Vec<_>>>()?;
        let mut out = Table::new(names.iter().cloned())?;
        out.rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(out)
    }

    /// Rename columns through `rename`; names it returns `None` for are kept.
    pub fn rename_columns<F>(&self, mut rename: F) -> Result<Table>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|name| rename(name).unwrap_or_else(|| name.clone()))
            .collect();
        let mut out = Table::new(names)?;
        out.rows = self.rows.clone();
        Ok(out)
    }

    /// Reshape onto `columns`, filling columns this table lacks with nulls.
    pub fn align_to(&self, columns: &[String]) -> Result<Table> {
        let indices: Vec<Option<usize>> =
            columns.iter().map(|name| self.column_index(name)).collect();
        let mut out = Table::new(columns.iter().cloned())?;
        out.rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| idx.map_or(Value::Null, |i| row[i].clone()))
                    .collect()
            })
            .collect();
        Ok(out)
    }
}
