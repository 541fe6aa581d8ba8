//! Key promotion: turning an invariant attribute into the key.

use std::collections::{HashMap, HashSet};

use cube_model::{
    CubeError, LeafLevel, LeafShape, LongDataset, NestedDataset, Result, Site, SpatialSidecar,
    Table, Value,
};

/// Promote the sidecar attribute `attribute` to the key of a long dataset.
///
/// The former key becomes the leaf key, kept as the second observation
/// column, and the former sidecar becomes the leaf sidecar. The new sidecar
/// has one row per distinct attribute value and no attributes of its own.
/// Rows are regrouped stably by their new key, so every key's rows are
/// contiguous and keep their relative order.
pub fn promote(long: &LongDataset, attribute: &str) -> Result<LongDataset> {
    if long.leaf().is_some() {
        return Err(CubeError::invalid_option(
            "key",
            attribute,
            "dataset is already promoted",
        ));
    }
    let sidecar = long.sidecar();
    let col = sidecar
        .column_index(attribute)
        .ok_or_else(|| CubeError::NotInvariant {
            column: attribute.to_string(),
        })?;

    let mut groups = SpatialSidecar::new(attribute, Vec::new())?;
    for (_, values) in sidecar.iter() {
        let group = &values[col];
        if group.is_null() {
            return Err(CubeError::MissingRequiredField {
                field: attribute.to_string(),
                role: "key",
            });
        }
        if !groups.contains(group) {
            groups.push(group.clone(), Vec::new())?;
        }
    }
    let group_rank: HashMap<&Value, usize> = groups
        .keys()
        .iter()
        .enumerate()
        .map(|(pos, key)| (key, pos))
        .collect();
    // old key -> (rank of its group, group value)
    let mut group_of: HashMap<&Value, (usize, &Value)> = HashMap::with_capacity(sidecar.len());
    for (key, values) in sidecar.iter() {
        let group = &values[col];
        if let Some(&pos) = group_rank.get(group) {
            group_of.insert(key, (pos, group));
        }
    }

    let mut leaf_rows: Vec<(usize, &Value, &[Value])> = sidecar
        .iter()
        .filter_map(|(key, values)| group_of.get(key).map(|&(pos, _)| (pos, key, values)))
        .collect();
    leaf_rows.sort_by_key(|(pos, ..)| *pos);
    let mut leaf_sidecar = SpatialSidecar::new(sidecar.key_column(), sidecar.columns().to_vec())?;
    for (_, key, values) in leaf_rows {
        leaf_sidecar.push(key.clone(), values.to_vec())?;
    }

    let observations = long.observations();
    let mut ranked = Vec::with_capacity(observations.height());
    let mut unknown = HashSet::new();
    for row in observations.rows() {
        match group_of.get(&row[0]) {
            Some(&(pos, group)) => ranked.push((pos, group, row)),
            None => {
                unknown.insert(&row[0]);
            }
        }
    }
    if !unknown.is_empty() {
        return Err(CubeError::UnmatchedSidecar {
            missing_in_sidecar: unknown.len(),
            missing_in_long: 0,
        });
    }
    ranked.sort_by_key(|(pos, ..)| *pos);

    let mut names = vec![attribute.to_string()];
    names.extend(observations.columns().iter().cloned());
    let mut promoted = Table::new(names)?;
    for (_, group, row) in ranked {
        let mut out = Vec::with_capacity(row.len() + 1);
        out.push(group.clone());
        out.extend(row.iter().cloned());
        promoted.push_row(out)?;
    }

    tracing::debug!(
        key = attribute,
        groups = groups.len(),
        leaves = leaf_sidecar.len(),
        "promoted attribute to key"
    );
    let leaf = LeafLevel {
        schema: long.schema().clone(),
        sidecar: leaf_sidecar,
    };
    LongDataset::new(long.schema().with_key(attribute), promoted, groups, Some(leaf))
}

/// Group the sites of a nested dataset by an invariant column.
///
/// One group per distinct value, in first-appearance order; each group holds
/// its original sites, in their original order. Groups start without
/// attributes; add them with [`NestedDataset::derive_attribute`].
pub fn switch_key(nested: &NestedDataset, column: &str) -> Result<NestedDataset> {
    if nested.is_grouped() {
        return Err(CubeError::invalid_option(
            "key",
            column,
            "dataset is already grouped",
        ));
    }
    if column == nested.schema().key() {
        return Err(CubeError::invalid_option("key", column, "column is already the key"));
    }
    let Some(col) = nested.spatial_index(column) else {
        if nested.ts_columns().iter().any(|c| c == column) {
            return Err(CubeError::NotInvariant {
                column: column.to_string(),
            });
        }
        return Err(CubeError::ColumnNotFound {
            column: column.to_string(),
        });
    };

    let mut order: Vec<&Value> = Vec::new();
    let mut members: HashMap<&Value, Vec<usize>> = HashMap::new();
    for (pos, site) in nested.sites().iter().enumerate() {
        let value = &site.attributes()[col];
        if value.is_null() {
            return Err(CubeError::MissingRequiredField {
                field: column.to_string(),
                role: "key",
            });
        }
        members
            .entry(value)
            .or_insert_with(|| {
                order.push(value);
                Vec::new()
            })
            .push(pos);
    }

    let sites = order
        .iter()
        .map(|&value| {
            let positions = members.get(value).map_or(&[][..], Vec::as_slice);
            Ok(Site::group(
                value.clone(),
                Vec::new(),
                nested.select_positions(positions)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(key = column, groups = sites.len(), "switched key");
    let leaf = LeafShape {
        schema: nested.schema().clone(),
        spatial_columns: nested.spatial_columns().to_vec(),
    };
    NestedDataset::grouped(nested.schema().with_key(column), Vec::new(), sites, leaf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{as_nested, to_long, to_nested};
    use cube_model::{Coordinates, CubeSchema};

    fn nested() -> NestedDataset {
        let table = Table::with_rows(
            ["id", "date", "long", "lat", "region", "tmax"],
            vec![
                vec!["a".into(), Value::Int(1), 1.0.into(), 1.0.into(), "north".into(), 10.0.into()],
                vec!["a".into(), Value::Int(2), 1.0.into(), 1.0.into(), "north".into(), 11.0.into()],
                vec!["b".into(), Value::Int(1), 2.0.into(), 2.0.into(), "south".into(), 20.0.into()],
                vec!["c".into(), Value::Int(1), 3.0.into(), 3.0.into(), "north".into(), 30.0.into()],
            ],
        )
        .unwrap();
        as_nested(&table, &CubeSchema::new("id", "date", Coordinates::default())).unwrap()
    }

    #[test]
    fn switch_key_groups_in_first_appearance_order() {
        let grouped = switch_key(&nested(), "region").unwrap();
        assert_eq!(grouped.schema().key(), "region");
        assert_eq!(
            grouped.keys().collect::<Vec<_>>(),
            [&Value::from("north"), &Value::from("south")]
        );
        let north = grouped.sites()[0].members().unwrap();
        assert_eq!(
            north.keys().collect::<Vec<_>>(),
            [&Value::from("a"), &Value::from("c")]
        );
        assert_eq!(grouped.observation_count(), 4);
    }

    #[test]
    fn switch_key_rejects_variant_and_unknown_columns() {
        let ds = nested();
        assert!(matches!(
            switch_key(&ds, "tmax"),
            Err(CubeError::NotInvariant { .. })
        ));
        assert!(matches!(
            switch_key(&ds, "basin"),
            Err(CubeError::ColumnNotFound { .. })
        ));
        let grouped = switch_key(&ds, "region").unwrap();
        assert!(matches!(
            switch_key(&grouped, "region"),
            Err(CubeError::InvalidOption { .. })
        ));
    }

    #[test]
    fn grouped_long_form_replicates_the_new_key() {
        let grouped = switch_key(&nested(), "region").unwrap();
        let long = to_long(&grouped).unwrap();
        assert_eq!(long.observations().columns(), ["region", "id", "date", "tmax"]);
        assert_eq!(long.len(), 4);
        let keys: Vec<String> = long
            .observations()
            .rows()
            .iter()
            .map(|row| format!("{}/{}", row[0], row[1]))
            .collect();
        assert_eq!(keys, ["north/a", "north/a", "north/c", "south/b"]);
        assert_eq!(to_nested(&long).unwrap(), grouped);
    }

    #[test]
    fn promote_matches_switch_key() {
        let ds = nested();
        let promoted = promote(&to_long(&ds).unwrap(), "region").unwrap();
        let switched = to_long(&switch_key(&ds, "region").unwrap()).unwrap();
        assert_eq!(promoted, switched);
        assert_eq!(promoted.leaf().unwrap().sidecar.len(), 3);
    }

    #[test]
    fn promote_requires_a_sidecar_column() {
        let long = to_long(&nested()).unwrap();
        assert!(matches!(
            promote(&long, "tmax"),
            Err(CubeError::NotInvariant { .. })
        ));
        let promoted = promote(&long, "region").unwrap();
        assert!(matches!(
            promote(&promoted, "region"),
            Err(CubeError::InvalidOption { .. })
        ));
    }

    #[test]
    fn group_attributes_are_derived_by_the_caller() {
        let grouped = switch_key(&nested(), "region")
            .unwrap()
            .derive_attribute("n_sites", |site| {
                Value::from(site.members().map_or(0, NestedDataset::len))
            })
            .unwrap();
        assert_eq!(grouped.attribute(0, "n_sites"), Some(&Value::Int(2)));
        let long = to_long(&grouped).unwrap();
        assert_eq!(long.sidecar().columns(), ["n_sites"]);
        assert_eq!(to_nested(&long).unwrap(), grouped);
    }
}
