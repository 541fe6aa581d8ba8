//! Long form: one row per observation, invariants in a side table.

use std::collections::{HashMap, HashSet};

use crate::error::{CubeError, Result};
use crate::schema::CubeSchema;
use crate::table::Table;
use crate::value::Value;

/// Invariant attributes, one row per key.
///
/// Observation rows refer to sidecar rows through the key column, so the
/// invariants are stored once per site instead of once per observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialSidecar {
    key: String,
    columns: Vec<String>,
    keys: Vec<Value>,
    values: Vec<Vec<Value>>,
    positions: HashMap<Value, usize>,
}

impl SpatialSidecar {
    pub fn new(key: impl Into<String>, columns: Vec<String>) -> Result<Self> {
        let key = key.into();
        for (pos, name) in columns.iter().enumerate() {
            if *name == key || columns[..pos].contains(name) {
                return Err(CubeError::DuplicateColumn {
                    column: name.clone(),
                });
            }
        }
        Ok(Self {
            key,
            columns,
            keys: Vec::new(),
            values: Vec::new(),
            positions: HashMap::new(),
        })
    }

    /// Append the row for `key`. Keys must be unique and non-null.
    pub fn push(&mut self, key: Value, values: Vec<Value>) -> Result<()> {
        if key.is_null() {
            return Err(CubeError::MissingRequiredField {
                field: self.key.clone(),
                role: "key",
            });
        }
        if values.len() != self.columns.len() {
            return Err(CubeError::RowLengthMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        if self.positions.contains_key(&key) {
            return Err(CubeError::DuplicateKey {
                key: key.to_string(),
            });
        }
        self.positions.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        self.values.push(values);
        Ok(())
    }

    pub fn key_column(&self) -> &str {
        &self.key
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.positions.contains_key(key)
    }

    /// Attribute values for `key`, aligned with [`SpatialSidecar::columns`].
    pub fn get(&self, key: &Value) -> Option<&[Value]> {
        self.positions.get(key).map(|&pos| self.values[pos].as_slice())
    }

    pub fn value(&self, key: &Value, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.get(key).map(|row| &row[idx])
    }

    /// Rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &[Value])> {
        self.keys
            .iter()
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// Flat view with the key as the first column.
    pub fn to_table(&self) -> Result<Table> {
        let mut names = Vec::with_capacity(self.columns.len() + 1);
        names.push(self.key.clone());
        names.extend(self.columns.iter().cloned());
        let mut table = Table::new(names)?;
        for (key, values) in self.iter() {
            let mut row = Vec::with_capacity(values.len() + 1);
            row.push(key.clone());
            row.extend(values.iter().cloned());
            table.push_row(row)?;
        }
        Ok(table)
    }
}

/// Leaf sites of a promoted dataset: their schema and invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafLevel {
    pub schema: CubeSchema,
    pub sidecar: SpatialSidecar,
}

/// One row per observation, grouped by key.
///
/// The observation table starts with the key column, then the leaf key
/// column for a promoted dataset, then the index, then the variant columns.
#[derive(Debug, Clone, PartialEq)]
pub struct LongDataset {
    schema: CubeSchema,
    observations: Table,
    sidecar: SpatialSidecar,
    leaf: Option<LeafLevel>,
}

impl LongDataset {
    pub fn new(
        schema: CubeSchema,
        observations: Table,
        sidecar: SpatialSidecar,
        leaf: Option<LeafLevel>,
    ) -> Result<Self> {
        let mut identity = vec![(schema.key(), "key")];
        if let Some(leaf) = &leaf {
            identity.push((leaf.schema.key(), "key"));
        }
        identity.push((schema.index(), "index"));
        for (pos, &(column, role)) in identity.iter().enumerate() {
            if observations.columns().get(pos).map(String::as_str) != Some(column) {
                return Err(CubeError::MissingRequiredField {
                    field: column.to_string(),
                    role,
                });
            }
        }
        if sidecar.key_column() != schema.key() {
            return Err(CubeError::MissingRequiredField {
                field: schema.key().to_string(),
                role: "key",
            });
        }
        let width = identity.len();
        let mut seen = HashSet::with_capacity(observations.height());
        for row in observations.rows() {
            let id = &row[..width];
            if id.iter().any(Value::is_null) {
                return Err(CubeError::MissingRequiredField {
                    field: schema.index().to_string(),
                    role: "index",
                });
            }
            if !seen.insert(id) {
                return Err(CubeError::DuplicateObservation {
                    key: id[..width - 1]
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("/"),
                    index: id[width - 1].to_string(),
                });
            }
        }
        Ok(Self {
            schema,
            observations,
            sidecar,
            leaf,
        })
    }

    pub fn schema(&self) -> &CubeSchema {
        &self.schema
    }

    pub fn observations(&self) -> &Table {
        &self.observations
    }

    pub fn sidecar(&self) -> &SpatialSidecar {
        &self.sidecar
    }

    pub fn leaf(&self) -> Option<&LeafLevel> {
        self.leaf.as_ref()
    }

    /// Number of leading identity columns (key, optional leaf key, index).
    pub fn identity_width(&self) -> usize {
        if self.leaf.is_some() { 3 } else { 2 }
    }

    /// Observation columns after the identity columns.
    pub fn variant_columns(&self) -> &[String] {
        &self.observations.columns()[self.identity_width()..]
    }

    pub fn len(&self) -> usize {
        self.observations.height()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Distinct observation keys, in first-appearance order.
    pub fn observed_keys(&self) -> Vec<Value> {
        let mut seen = HashSet::new();
        self.observations
            .rows()
            .iter()
            .filter(|row| seen.insert(&row[0]))
            .map(|row| row[0].clone())
            .collect()
    }

    pub fn into_parts(self) -> (CubeSchema, Table, SpatialSidecar, Option<LeafLevel>) {
        (self.schema, self.observations, self.sidecar, self.leaf)
    }
}
