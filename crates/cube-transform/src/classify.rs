//! Invariant / variant classification of flat table columns.

use std::collections::HashMap;

use cube_model::{Result, Table, Value};

/// How the non-key columns of a table split up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Constant within every key group.
    pub invariant: Vec<String>,
    /// Changing within at least one key group.
    pub variant: Vec<String>,
    /// Null in every row.
    pub ignored: Vec<String>,
}

impl Classification {
    pub fn is_invariant(&self, column: &str) -> bool {
        self.invariant.iter().any(|c| c == column)
    }

    pub fn is_variant(&self, column: &str) -> bool {
        self.variant.iter().any(|c| c == column)
    }
}

/// Classify every column except `key`, in table order.
///
/// Nulls are ignored when comparing values, so a column that is constant
/// wherever it is set stays invariant even if some keys never set it.
pub fn detect_invariant(table: &Table, key: &str) -> Result<Classification> {
    let key_idx = table.require_column(key)?;
    let mut out = Classification::default();

    for (col_idx, name) in table.columns().iter().enumerate() {
        if col_idx == key_idx {
            continue;
        }
        let mut seen: HashMap<&Value, &Value> = HashMap::new();
        let mut varies = false;
        for row in table.rows() {
            let value = &row[col_idx];
            if value.is_null() {
                continue;
            }
            match seen.get(&row[key_idx]) {
                Some(first) if *first != value => {
                    varies = true;
                    break;
                }
                Some(_) => {}
                None => {
                    seen.insert(&row[key_idx], value);
                }
            }
        }
        if varies {
            out.variant.push(name.clone());
        } else if seen.is_empty() {
            out.ignored.push(name.clone());
        } else {
            out.invariant.push(name.clone());
        }
    }

    tracing::debug!(
        invariant = out.invariant.len(),
        variant = out.variant.len(),
        ignored = out.ignored.len(),
        "classified columns"
    );
    Ok(out)
}
