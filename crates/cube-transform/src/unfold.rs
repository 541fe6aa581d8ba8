//! Copying invariant attributes onto observation rows.

use cube_model::{CubeError, LongDataset, Result, Table, Value};

/// Append the named sidecar attributes to every observation row.
///
/// Long-form consumers can then filter or plot on them without a join.
/// `to_nested` drops the copies again.
pub fn unfold(long: &LongDataset, columns: &[String]) -> Result<LongDataset> {
    let sidecar = long.sidecar();
    let picks = columns
        .iter()
        .map(|name| {
            sidecar
                .column_index(name)
                .ok_or_else(|| CubeError::NotInvariant {
                    column: name.clone(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let observations = long.observations();
    let mut names = observations.columns().to_vec();
    names.extend(columns.iter().cloned());
    let mut unfolded = Table::new(names)?;
    for row in observations.rows() {
        let attributes = sidecar.get(&row[0]);
        let mut out = Vec::with_capacity(row.len() + picks.len());
        out.extend(row.iter().cloned());
        out.extend(
            picks
                .iter()
                .map(|&i| attributes.map_or(Value::Null, |values| values[i].clone())),
        );
        unfolded.push_row(out)?;
    }

    tracing::debug!(columns = columns.len(), rows = unfolded.height(), "unfolded attributes");
    LongDataset::new(
        long.schema().clone(),
        unfolded,
        sidecar.clone(),
        long.leaf().cloned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{as_nested, to_long, to_nested};
    use cube_model::{Coordinates, CubeSchema};

    fn long() -> LongDataset {
        let table = Table::with_rows(
            ["id", "date", "long", "lat", "tmax"],
            vec![
                vec!["a".into(), Value::Int(1), 5.0.into(), 6.0.into(), 10.0.into()],
                vec!["a".into(), Value::Int(2), 5.0.into(), 6.0.into(), 11.0.into()],
            ],
        )
        .unwrap();
        let schema = CubeSchema::new("id", "date", Coordinates::default());
        to_long(&as_nested(&table, &schema).unwrap()).unwrap()
    }

    #[test]
    fn copies_attributes_onto_rows() {
        let long = long();
        let unfolded = unfold(&long, &["lat".to_string()]).unwrap();
        assert_eq!(unfolded.observations().columns(), ["id", "date", "tmax", "lat"]);
        assert_eq!(unfolded.observations().value(1, "lat"), Some(&Value::Float(6.0)));
        assert_eq!(to_nested(&unfolded).unwrap(), to_nested(&long).unwrap());
    }

    #[test]
    fn variant_columns_cannot_be_unfolded() {
        let err = unfold(&long(), &["tmax".to_string()]).unwrap_err();
        assert!(matches!(err, CubeError::NotInvariant { .. }));
    }
}
