//! Grouping of table rows by one column.

use std::collections::HashMap;

use cube_model::Value;

/// Row positions per distinct value, in first-appearance order.
pub(crate) struct RowGroups<'a> {
    order: Vec<&'a Value>,
    rows: HashMap<&'a Value, Vec<usize>>,
}

impl<'a> RowGroups<'a> {
    pub(crate) fn new(rows: &'a [Vec<Value>], column: usize) -> Self {
        let mut order = Vec::new();
        let mut groups: HashMap<&'a Value, Vec<usize>> = HashMap::new();
        for (pos, row) in rows.iter().enumerate() {
            let value = &row[column];
            groups
                .entry(value)
                .or_insert_with(|| {
                    order.push(value);
                    Vec::new()
                })
                .push(pos);
        }
        Self {
            order,
            rows: groups,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &'a Value> + '_ {
        self.order.iter().copied()
    }

    pub(crate) fn get(&self, key: &Value) -> Option<&[usize]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&'a Value, &[usize])> + '_ {
        self.order
            .iter()
            .map(|&key| (key, self.rows.get(key).map_or(&[][..], Vec::as_slice)))
    }
}
