//! Nested form: one row per site.
//!
//! A [`NestedDataset`] is an arena of [`Site`] records indexed by key. Each
//! site owns its invariant attributes (aligned with the dataset's spatial
//! columns) and a [`Payload`]: either its own time series (`ts`) or, after a
//! key switch, the original sites that make up the group.

use std::collections::{HashMap, HashSet};

use crate::error::{CubeError, Result};
use crate::schema::CubeSchema;
use crate::table::Table;
use crate::value::Value;

/// The time-varying part of a site.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The nested `ts` table: index column first, then the variant columns.
    Series(Table),
    /// The original sites grouped under this key.
    Members(Box<NestedDataset>),
}

/// One row of the nested form.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    key: Value,
    attributes: Vec<Value>,
    payload: Payload,
}

impl Site {
    /// A site with its own time series.
    pub fn series(key: impl Into<Value>, attributes: Vec<Value>, ts: Table) -> Self {
        Self {
            key: key.into(),
            attributes,
            payload: Payload::Series(ts),
        }
    }

    /// A group whose payload is the original sites.
    pub fn group(key: impl Into<Value>, attributes: Vec<Value>, members: NestedDataset) -> Self {
        Self {
            key: key.into(),
            attributes,
            payload: Payload::Members(Box::new(members)),
        }
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn attributes(&self) -> &[Value] {
        &self.attributes
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The nested time series, when this site owns one.
    pub fn ts(&self) -> Option<&Table> {
        match &self.payload {
            Payload::Series(ts) => Some(ts),
            Payload::Members(_) => None,
        }
    }

    /// The grouped original sites, when this site is a group.
    pub fn members(&self) -> Option<&NestedDataset> {
        match &self.payload {
            Payload::Series(_) => None,
            Payload::Members(members) => Some(members),
        }
    }

    pub fn into_parts(self) -> (Value, Vec<Value>, Payload) {
        (self.key, self.attributes, self.payload)
    }
}

/// Shape of the original sites inside a grouped dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafShape {
    pub schema: CubeSchema,
    pub spatial_columns: Vec<String>,
}

/// One row per unique key, with a nested time series per row.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedDataset {
    schema: CubeSchema,
    spatial_columns: Vec<String>,
    ts_columns: Vec<String>,
    sites: Vec<Site>,
    positions: HashMap<Value, usize>,
    leaf: Option<LeafShape>,
}

impl NestedDataset {
    /// Build an ungrouped dataset.
    ///
    /// `spatial_columns` lists the invariant attributes (coordinates
    /// included, key excluded) in the order of each site's attribute vector.
    pub fn new(schema: CubeSchema, spatial_columns: Vec<String>, sites: Vec<Site>) -> Result<Self> {
        for coord in schema.coordinates().names() {
            if !spatial_columns.iter().any(|c| c == coord) {
                return Err(CubeError::MissingRequiredField {
                    field: coord.to_string(),
                    role: "coordinate",
                });
            }
        }
        let ts_columns = match sites.first().map(Site::payload) {
            Some(Payload::Series(ts)) => ts.columns().to_vec(),
            Some(Payload::Members(_)) => {
                return Err(CubeError::shape(
                    "grouped sites passed to an ungrouped dataset",
                ));
            }
            None => vec![schema.index().to_string()],
        };
        if ts_columns.first().map(String::as_str) != Some(schema.index()) {
            return Err(CubeError::MissingRequiredField {
                field: schema.index().to_string(),
                role: "index",
            });
        }
        for site in &sites {
            let Payload::Series(ts) = &site.payload else {
                return Err(CubeError::shape(format!(
                    "site {} is a group inside an ungrouped dataset",
                    site.key
                )));
            };
            if ts.columns() != ts_columns.as_slice() {
                return Err(CubeError::shape(format!(
                    "ts of site {} has columns [{}], expected [{}]",
                    site.key,
                    ts.columns().join(", "),
                    ts_columns.join(", ")
                )));
            }
            check_unique_index(&site.key, ts)?;
        }
        Self::assemble(schema, spatial_columns, ts_columns, sites, None)
    }

    /// Build a grouped dataset whose payloads are the original sites.
    pub fn grouped(
        schema: CubeSchema,
        spatial_columns: Vec<String>,
        sites: Vec<Site>,
        leaf: LeafShape,
    ) -> Result<Self> {
        let mut ts_columns: Option<Vec<String>> = None;
        let mut leaf_keys = HashSet::new();
        for site in &sites {
            let Payload::Members(members) = &site.payload else {
                return Err(CubeError::shape(format!(
                    "site {} owns a series inside a grouped dataset",
                    site.key
                )));
            };
            if members.is_grouped() {
                return Err(CubeError::shape(format!(
                    "group {} nests more than one level",
                    site.key
                )));
            }
            if members.schema != leaf.schema || members.spatial_columns != leaf.spatial_columns {
                return Err(CubeError::shape(format!(
                    "members of group {} do not share the leaf shape",
                    site.key
                )));
            }
            if !members.is_empty() {
                match &ts_columns {
                    Some(expected) if expected != &members.ts_columns => {
                        return Err(CubeError::shape(format!(
                            "members of group {} have ts columns [{}], expected [{}]",
                            site.key,
                            members.ts_columns.join(", "),
                            expected.join(", ")
                        )));
                    }
                    Some(_) => {}
                    None => ts_columns = Some(members.ts_columns.clone()),
                }
            }
            for member in members.sites() {
                if !leaf_keys.insert(member.key.clone()) {
                    return Err(CubeError::DuplicateKey {
                        key: member.key.to_string(),
                    });
                }
            }
        }
        let ts_columns = ts_columns.unwrap_or_else(|| vec![leaf.schema.index().to_string()]);
        Self::assemble(schema, spatial_columns, ts_columns, sites, Some(leaf))
    }

    fn assemble(
        schema: CubeSchema,
        spatial_columns: Vec<String>,
        ts_columns: Vec<String>,
        sites: Vec<Site>,
        leaf: Option<LeafShape>,
    ) -> Result<Self> {
        for (pos, name) in spatial_columns.iter().enumerate() {
            if name == schema.key() || spatial_columns[..pos].contains(name) {
                return Err(CubeError::DuplicateColumn {
                    column: name.clone(),
                });
            }
        }
        let mut positions = HashMap::with_capacity(sites.len());
        for (pos, site) in sites.iter().enumerate() {
            if site.key.is_null() {
                return Err(CubeError::MissingRequiredField {
                    field: schema.key().to_string(),
                    role: "key",
                });
            }
            if site.attributes.len() != spatial_columns.len() {
                return Err(CubeError::RowLengthMismatch {
                    expected: spatial_columns.len(),
                    actual: site.attributes.len(),
                });
            }
            if positions.insert(site.key.clone(), pos).is_some() {
                return Err(CubeError::DuplicateKey {
                    key: site.key.to_string(),
                });
            }
        }
        Ok(Self {
            schema,
            spatial_columns,
            ts_columns,
            sites,
            positions,
            leaf,
        })
    }

    pub fn schema(&self) -> &CubeSchema {
        &self.schema
    }

    pub fn spatial_columns(&self) -> &[String] {
        &self.spatial_columns
    }

    /// Columns of every `ts` table (of the leaf sites, for a grouped dataset).
    pub fn ts_columns(&self) -> &[String] {
        &self.ts_columns
    }

    /// The `ts` columns without the index.
    pub fn variant_columns(&self) -> &[String] {
        &self.ts_columns[1..]
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn is_grouped(&self) -> bool {
        self.leaf.is_some()
    }

    pub fn leaf(&self) -> Option<&LeafShape> {
        self.leaf.as_ref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.sites.iter().map(Site::key)
    }

    pub fn position(&self, key: &Value) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn site(&self, key: &Value) -> Option<&Site> {
        self.position(key).map(|pos| &self.sites[pos])
    }

    pub fn spatial_index(&self, column: &str) -> Option<usize> {
        self.spatial_columns.iter().position(|c| c == column)
    }

    /// Invariant attribute of the site at `pos`.
    pub fn attribute(&self, pos: usize, column: &str) -> Option<&Value> {
        let idx = self.spatial_index(column)?;
        self.sites.get(pos).map(|site| &site.attributes[idx])
    }

    /// Longitude and latitude (degrees) of the site at `pos`.
    pub fn coordinates(&self, pos: usize) -> Result<(f64, f64)> {
        let coords = self.schema.coordinates();
        let mut out = [0.0; 2];
        for (slot, (column, limit)) in out
            .iter_mut()
            .zip([(&coords.longitude, 360.0), (&coords.latitude, 90.0)])
        {
            let value = self
                .attribute(pos, column)
                .ok_or_else(|| CubeError::MissingRequiredField {
                    field: column.clone(),
                    role: "coordinate",
                })?;
            *slot = value
                .as_f64()
                .filter(|v| v.is_finite() && v.abs() <= limit)
                .ok_or_else(|| CubeError::InvalidValue {
                    column: column.clone(),
                    value: value.to_string(),
                    expected: "a coordinate in degrees",
                })?;
        }
        Ok((out[0], out[1]))
    }

    /// Number of leaf observations across all sites.
    pub fn observation_count(&self) -> usize {
        self.sites
            .iter()
            .map(|site| match &site.payload {
                Payload::Series(ts) => ts.height(),
                Payload::Members(members) => members.observation_count(),
            })
            .sum()
    }

    /// Add (or replace) an invariant attribute computed from each site.
    ///
    /// This is how a grouped dataset gains group-level attributes such as a
    /// centroid.
    pub fn derive_attribute<F>(mut self, name: &str, mut derive: F) -> Result<Self>
    where
        F: FnMut(&Site) -> Value,
    {
        if self.schema.key() == name || self.ts_columns.iter().any(|c| c == name) {
            return Err(CubeError::DuplicateColumn {
                column: name.to_string(),
            });
        }
        let existing = self.spatial_index(name);
        if existing.is_none() {
            self.spatial_columns.push(name.to_string());
        }
        for site in &mut self.sites {
            let value = derive(site);
            match existing {
                Some(idx) => site.attributes[idx] = value,
                None => site.attributes.push(value),
            }
        }
        Ok(self)
    }

    /// New dataset holding the sites at `positions`, in that order.
    pub fn select_positions(&self, positions: &[usize]) -> Result<Self> {
        let sites = positions
            .iter()
            .filter_map(|&pos| self.sites.get(pos).cloned())
            .collect();
        Self::assemble(
            self.schema.clone(),
            self.spatial_columns.clone(),
            self.ts_columns.clone(),
            sites,
            self.leaf.clone(),
        )
    }

    pub fn into_sites(self) -> Vec<Site> {
        self.sites
    }
}

fn check_unique_index(key: &Value, ts: &Table) -> Result<()> {
    let mut seen = HashSet::with_capacity(ts.height());
    for row in ts.rows() {
        let index = &row[0];
        if index.is_null() {
            return Err(CubeError::MissingRequiredField {
                field: ts.columns()[0].clone(),
                role: "index",
            });
        }
        if !seen.insert(index) {
            return Err(CubeError::DuplicateObservation {
                key: key.to_string(),
                index: index.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Coordinates;

    fn schema() -> CubeSchema {
        CubeSchema::new("id", "date", Coordinates::new("long", "lat"))
    }

    fn spatial() -> Vec<String> {
        vec!["long".to_string(), "lat".to_string(), "name".to_string()]
    }

    fn site(key: &str, long: f64, lat: f64, values: &[(i64, f64)]) -> Site {
        let rows = values
            .iter()
            .map(|(d, v)| vec![Value::Int(*d), Value::Float(*v)])
            .collect();
        Site::series(
            key,
            vec![long.into(), lat.into(), key.to_uppercase().into()],
            Table::with_rows(["date", "tmax"], rows).unwrap(),
        )
    }

    #[test]
    fn keys_are_unique() {
        let err = NestedDataset::new(
            schema(),
            spatial(),
            vec![site("a", 0.0, 0.0, &[]), site("a", 1.0, 1.0, &[])],
        )
        .unwrap_err();
        assert!(matches!(err, CubeError::DuplicateKey { .. }));
    }

    #[test]
    fn sibling_ts_must_share_columns() {
        let odd = Site::series(
            "b",
            vec![0.0.into(), 0.0.into(), "B".into()],
            Table::new(["date", "prcp"]).unwrap(),
        );
        let err = NestedDataset::new(schema(), spatial(), vec![site("a", 0.0, 0.0, &[]), odd])
            .unwrap_err();
        assert!(matches!(err, CubeError::ShapeMismatch { .. }));
    }

    #[test]
    fn coordinates_are_required() {
        let err = NestedDataset::new(schema(), vec!["name".to_string()], vec![]).unwrap_err();
        assert!(matches!(
            err,
            CubeError::MissingRequiredField {
                role: "coordinate",
                ..
            }
        ));
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let err = NestedDataset::new(
            schema(),
            spatial(),
            vec![site("a", 0.0, 0.0, &[(1, 1.0), (1, 2.0)])],
        )
        .unwrap_err();
        assert!(matches!(err, CubeError::DuplicateObservation { .. }));
    }

    #[test]
    fn lookup_and_coordinates() {
        let ds = NestedDataset::new(
            schema(),
            spatial(),
            vec![
                site("a", 144.9, -37.8, &[(1, 20.0)]),
                site("b", 151.2, -33.9, &[(1, 22.0), (2, 23.5)]),
            ],
        )
        .unwrap();
        assert_eq!(ds.position(&Value::from("b")), Some(1));
        assert_eq!(ds.coordinates(0).unwrap(), (144.9, -37.8));
        assert_eq!(ds.observation_count(), 3);
        assert_eq!(ds.variant_columns(), ["tmax"]);
    }

    #[test]
    fn out_of_range_latitude_is_invalid() {
        let ds = NestedDataset::new(schema(), spatial(), vec![site("a", 0.0, 95.0, &[])]).unwrap();
        assert!(matches!(
            ds.coordinates(0),
            Err(CubeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn derive_attribute_appends_column() {
        let ds = NestedDataset::new(schema(), spatial(), vec![site("a", 1.0, 2.0, &[(1, 3.0)])])
            .unwrap()
            .derive_attribute("n_obs", |s| Value::from(s.ts().map_or(0, Table::height)))
            .unwrap();
        assert_eq!(ds.spatial_columns().last().unwrap(), "n_obs");
        assert_eq!(ds.attribute(0, "n_obs"), Some(&Value::Int(1)));
    }
}
