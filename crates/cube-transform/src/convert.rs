//! Conversion between the nested and long forms.

use std::collections::{HashMap, HashSet};

use cube_model::{
    CubeError, CubeSchema, LeafLevel, LeafShape, LongDataset, NestedDataset, Result, Site,
    SpatialSidecar, Table, Value,
};
use serde::{Deserialize, Serialize};

use crate::classify::detect_invariant;
use crate::rows::RowGroups;

/// How [`to_nested_with`] reconciles observation keys with sidecar keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// Keep keys present on both sides only.
    Inner,
    /// Keep every sidecar key; keys without observations get an empty series.
    #[default]
    Sidecar,
    /// Fail on any divergence.
    Strict,
}

/// Keys that did not line up while re-nesting a long dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinReport {
    /// Observed keys with no sidecar row.
    pub missing_in_sidecar: Vec<Value>,
    /// Sidecar keys with no observations.
    pub missing_in_long: Vec<Value>,
    /// Keys (group or leaf) left out of the output.
    pub dropped: Vec<Value>,
}

impl JoinReport {
    pub fn is_clean(&self) -> bool {
        self.missing_in_sidecar.is_empty() && self.missing_in_long.is_empty() && self.dropped.is_empty()
    }
}

fn required(table: &Table, column: &str, role: &'static str) -> Result<usize> {
    table
        .column_index(column)
        .ok_or_else(|| CubeError::MissingRequiredField {
            field: column.to_string(),
            role,
        })
}

/// Build the nested form of a flat table with one row per observation.
///
/// Invariant columns become site attributes (first non-null value per key),
/// variant columns go into `ts` behind the index, and columns that are null
/// everywhere are dropped. Each `ts` is sorted by index, keeping input order
/// for equal indexes.
pub fn as_nested(table: &Table, schema: &CubeSchema) -> Result<NestedDataset> {
    let key_idx = required(table, schema.key(), "key")?;
    let index_idx = required(table, schema.index(), "index")?;
    for coord in schema.coordinates().names() {
        required(table, coord, "coordinate")?;
    }
    let classes = detect_invariant(table, schema.key())?;

    let columns = table.columns();
    let mut spatial = Vec::new();
    let mut ts_picks = vec![index_idx];
    for (idx, name) in columns.iter().enumerate() {
        if idx == key_idx || idx == index_idx {
            continue;
        }
        if schema.coordinates().contains(name) || classes.is_invariant(name) {
            spatial.push(idx);
        } else if classes.is_variant(name) {
            ts_picks.push(idx);
        } else {
            tracing::debug!(column = %name, "dropping all-null column");
        }
    }
    let ts_names: Vec<String> = ts_picks.iter().map(|&i| columns[i].clone()).collect();

    let rows = table.rows();
    let groups = RowGroups::new(rows, key_idx);
    let mut sites = Vec::with_capacity(groups.len());
    for (key, members) in groups.iter() {
        if key.is_null() {
            return Err(CubeError::MissingRequiredField {
                field: schema.key().to_string(),
                role: "key",
            });
        }

        let mut attributes = Vec::with_capacity(spatial.len());
        for &col in &spatial {
            let mut values = members
                .iter()
                .map(|&r| &rows[r][col])
                .filter(|v| !v.is_null());
            let first = values.next().cloned().unwrap_or_default();
            if schema.coordinates().contains(&columns[col]) && values.any(|v| *v != first) {
                return Err(CubeError::VaryingCoordinate {
                    column: columns[col].clone(),
                    key: key.to_string(),
                });
            }
            attributes.push(first);
        }

        if members.iter().any(|&r| rows[r][index_idx].is_null()) {
            return Err(CubeError::MissingRequiredField {
                field: schema.index().to_string(),
                role: "index",
            });
        }
        let mut ordered = members.to_vec();
        ordered.sort_by(|&a, &b| rows[a][index_idx].cmp(&rows[b][index_idx]));
        let ts_rows = ordered
            .iter()
            .map(|&r| ts_picks.iter().map(|&c| rows[r][c].clone()).collect())
            .collect();
        let ts = Table::with_rows(ts_names.iter().cloned(), ts_rows)?;
        sites.push(Site::series(key.clone(), attributes, ts));
    }

    let spatial_names = spatial.iter().map(|&i| columns[i].clone()).collect();
    let nested = NestedDataset::new(schema.clone(), spatial_names, sites)?;
    tracing::debug!(
        sites = nested.len(),
        observations = nested.observation_count(),
        "built nested dataset"
    );
    Ok(nested)
}

/// Sidecar columns for a level: spatial columns not shadowed by a `ts` column.
///
/// Coordinates are never shadowed.
fn sidecar_layout(
    schema: &CubeSchema,
    spatial_columns: &[String],
    ts_columns: &[String],
) -> (Vec<String>, Vec<usize>) {
    let mut names = Vec::with_capacity(spatial_columns.len());
    let mut picks = Vec::with_capacity(spatial_columns.len());
    for (idx, name) in spatial_columns.iter().enumerate() {
        if !schema.coordinates().contains(name) && ts_columns.contains(name) {
            tracing::debug!(column = %name, "attribute shadowed by a ts column, treated as variant");
            continue;
        }
        names.push(name.clone());
        picks.push(idx);
    }
    (names, picks)
}

fn pick(values: &[Value], picks: &[usize]) -> Vec<Value> {
    picks.iter().map(|&i| values[i].clone()).collect()
}

fn series_of<'a>(site: &'a Site) -> Result<&'a Table> {
    site.ts().ok_or_else(|| {
        CubeError::shape(format!("site {} has no series of its own", site.key()))
    })
}

/// Flatten a nested dataset into one row per observation.
///
/// A grouped dataset yields one row per leaf observation, with the group key
/// and the leaf key leading each row.
pub fn to_long(nested: &NestedDataset) -> Result<LongDataset> {
    let long = match nested.leaf() {
        None => long_from_series(nested)?,
        Some(leaf) => long_from_groups(nested, leaf)?,
    };
    tracing::debug!(
        sites = long.sidecar().len(),
        observations = long.len(),
        "flattened to long form"
    );
    Ok(long)
}

fn long_from_series(nested: &NestedDataset) -> Result<LongDataset> {
    let schema = nested.schema();
    let (columns, picks) = sidecar_layout(schema, nested.spatial_columns(), nested.ts_columns());
    let mut sidecar = SpatialSidecar::new(schema.key(), columns)?;

    let mut names = vec![schema.key().to_string()];
    names.extend(nested.ts_columns().iter().cloned());
    let mut observations = Table::new(names)?;
    for site in nested.sites() {
        sidecar.push(site.key().clone(), pick(site.attributes(), &picks))?;
        for row in series_of(site)?.rows() {
            let mut out = Vec::with_capacity(row.len() + 1);
            out.push(site.key().clone());
            out.extend(row.iter().cloned());
            observations.push_row(out)?;
        }
    }
    LongDataset::new(schema.clone(), observations, sidecar, None)
}

fn long_from_groups(nested: &NestedDataset, leaf: &LeafShape) -> Result<LongDataset> {
    let schema = nested.schema();
    let mut sidecar = SpatialSidecar::new(schema.key(), nested.spatial_columns().to_vec())?;
    let (leaf_columns, picks) =
        sidecar_layout(&leaf.schema, &leaf.spatial_columns, nested.ts_columns());
    let mut leaf_sidecar = SpatialSidecar::new(leaf.schema.key(), leaf_columns)?;

    let mut names = vec![schema.key().to_string(), leaf.schema.key().to_string()];
    names.extend(nested.ts_columns().iter().cloned());
    let mut observations = Table::new(names)?;
    for group in nested.sites() {
        sidecar.push(group.key().clone(), group.attributes().to_vec())?;
        let members = group.members().ok_or_else(|| {
            CubeError::shape(format!("group {} has no member sites", group.key()))
        })?;
        for member in members.sites() {
            leaf_sidecar.push(member.key().clone(), pick(member.attributes(), &picks))?;
            for row in series_of(member)?.rows() {
                let mut out = Vec::with_capacity(row.len() + 2);
                out.push(group.key().clone());
                out.push(member.key().clone());
                out.extend(row.iter().cloned());
                observations.push_row(out)?;
            }
        }
    }
    let leaf = LeafLevel {
        schema: leaf.schema.clone(),
        sidecar: leaf_sidecar,
    };
    LongDataset::new(schema.clone(), observations, sidecar, Some(leaf))
}

/// Re-nest a long dataset with [`JoinPolicy::Sidecar`], the inverse of [`to_long`].
pub fn to_nested(long: &LongDataset) -> Result<NestedDataset> {
    to_nested_with(long, JoinPolicy::Sidecar).map(|(nested, _)| nested)
}

/// Re-nest a long dataset, reconciling keys according to `policy`.
///
/// Sites come out in sidecar order. Observation columns that are copies of
/// sidecar attributes (see `unfold`) are left out of `ts`.
pub fn to_nested_with(long: &LongDataset, policy: JoinPolicy) -> Result<(NestedDataset, JoinReport)> {
    let schema = long.schema();
    let sidecar = long.sidecar();
    let rows = long.observations().rows();
    let width = long.identity_width();

    let mut layout = TsLayout {
        names: vec![schema.index().to_string()],
        picks: vec![width - 1],
    };
    for (offset, name) in long.variant_columns().iter().enumerate() {
        if sidecar.column_index(name).is_some() {
            tracing::debug!(column = %name, "dropping unfolded sidecar copy");
            continue;
        }
        layout.names.push(name.clone());
        layout.picks.push(width + offset);
    }

    let groups = RowGroups::new(rows, 0);
    let mut report = JoinReport {
        missing_in_sidecar: groups.keys().filter(|k| !sidecar.contains(k)).cloned().collect(),
        missing_in_long: sidecar
            .keys()
            .iter()
            .filter(|k| groups.get(k).is_none())
            .cloned()
            .collect(),
        dropped: Vec::new(),
    };
    if policy == JoinPolicy::Strict
        && (!report.missing_in_sidecar.is_empty() || !report.missing_in_long.is_empty())
    {
        return Err(CubeError::UnmatchedSidecar {
            missing_in_sidecar: report.missing_in_sidecar.len(),
            missing_in_long: report.missing_in_long.len(),
        });
    }
    report.dropped.extend(report.missing_in_sidecar.iter().cloned());
    if policy == JoinPolicy::Inner {
        report.dropped.extend(report.missing_in_long.iter().cloned());
    }
    let keep: Vec<&Value> = sidecar
        .keys()
        .iter()
        .filter(|k| policy != JoinPolicy::Inner || groups.get(k).is_some())
        .collect();

    let nested = match long.leaf() {
        None => {
            let sites = keep
                .iter()
                .map(|&key| {
                    let ts = layout.table(rows, groups.get(key).unwrap_or_default())?;
                    Ok(Site::series(key.clone(), attributes_of(sidecar, key), ts))
                })
                .collect::<Result<Vec<_>>>()?;
            NestedDataset::new(schema.clone(), sidecar.columns().to_vec(), sites)?
        }
        Some(leaf) => nest_groups(long, leaf, &keep, &layout, policy, &mut report)?,
    };

    if !report.dropped.is_empty() {
        tracing::warn!(
            dropped = report.dropped.len(),
            missing_in_sidecar = report.missing_in_sidecar.len(),
            missing_in_long = report.missing_in_long.len(),
            ?policy,
            "keys dropped while re-nesting"
        );
    }
    Ok((nested, report))
}

struct TsLayout {
    names: Vec<String>,
    picks: Vec<usize>,
}

impl TsLayout {
    fn table(&self, rows: &[Vec<Value>], selected: &[usize]) -> Result<Table> {
        let ts_rows = selected
            .iter()
            .map(|&r| self.picks.iter().map(|&c| rows[r][c].clone()).collect())
            .collect();
        Table::with_rows(self.names.iter().cloned(), ts_rows)
    }
}

fn attributes_of(sidecar: &SpatialSidecar, key: &Value) -> Vec<Value> {
    sidecar
        .get(key)
        .map_or_else(|| vec![Value::Null; sidecar.columns().len()], <[Value]>::to_vec)
}

fn nest_groups(
    long: &LongDataset,
    leaf: &LeafLevel,
    keep: &[&Value],
    layout: &TsLayout,
    policy: JoinPolicy,
    report: &mut JoinReport,
) -> Result<NestedDataset> {
    let rows = long.observations().rows();
    let group_column = long.schema().key();
    let leaf_groups = RowGroups::new(rows, 1);

    for (leaf_key, leaf_rows) in leaf_groups.iter() {
        let owner = &rows[leaf_rows[0]][0];
        if leaf_rows.iter().any(|&r| rows[r][0] != *owner) {
            return Err(CubeError::DuplicateKey {
                key: leaf_key.to_string(),
            });
        }
    }
    let unknown: Vec<Value> = leaf_groups
        .keys()
        .filter(|k| !leaf.sidecar.contains(k))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        if policy == JoinPolicy::Strict {
            return Err(CubeError::UnmatchedSidecar {
                missing_in_sidecar: unknown.len(),
                missing_in_long: 0,
            });
        }
        report.missing_in_sidecar.extend(unknown.iter().cloned());
        report.dropped.extend(unknown);
    }

    // Leaf sidecar rows bucketed by their owning group, in sidecar order.
    let mut by_group: HashMap<&Value, Vec<(&Value, &[Value])>> = HashMap::new();
    let mut orphans = HashSet::new();
    for (leaf_key, attributes) in leaf.sidecar.iter() {
        let owner = match leaf_groups.get(leaf_key) {
            Some(leaf_rows) => Some(&rows[leaf_rows[0]][0]),
            None => leaf.sidecar.value(leaf_key, group_column),
        };
        match owner {
            Some(owner) => by_group.entry(owner).or_default().push((leaf_key, attributes)),
            None => {
                orphans.insert(leaf_key);
            }
        }
    }

    let mut sites = Vec::with_capacity(keep.len());
    for &group_key in keep {
        let members = by_group
            .remove(group_key)
            .unwrap_or_default()
            .into_iter()
            .map(|(leaf_key, attributes)| {
                let ts = layout.table(rows, leaf_groups.get(leaf_key).unwrap_or_default())?;
                Ok(Site::series(leaf_key.clone(), attributes.to_vec(), ts))
            })
            .collect::<Result<Vec<_>>>()?;
        let members = NestedDataset::new(
            leaf.schema.clone(),
            leaf.sidecar.columns().to_vec(),
            members,
        )?;
        sites.push(Site::group(
            group_key.clone(),
            attributes_of(long.sidecar(), group_key),
            members,
        ));
    }
    // Leaves whose group was dropped or never named.
    orphans.extend(by_group.into_values().flatten().map(|(leaf_key, _)| leaf_key));
    report.dropped.extend(
        leaf.sidecar
            .keys()
            .iter()
            .filter(|k| orphans.contains(k))
            .cloned(),
    );

    let shape = LeafShape {
        schema: leaf.schema.clone(),
        spatial_columns: leaf.sidecar.columns().to_vec(),
    };
    NestedDataset::grouped(
        long.schema().clone(),
        long.sidecar().columns().to_vec(),
        sites,
        shape,
    )
}
