//! Temporal matching: agreement of the highest values of paired series.

use cube_model::{CubeError, NestedDataset, Result, Value};
use rayon::prelude::*;

use crate::options::{MatchPair, Side, TemporalOptions};

/// Index kinds whose ordinals share an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Numeric,
    Calendar,
}

impl IndexKind {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(_) | Value::Float(_) => Some(IndexKind::Numeric),
            Value::Date(_) | Value::DateTime(_) => Some(IndexKind::Calendar),
            _ => None,
        }
    }
}

/// `(ordinal, value)` points of one site's variable, nulls skipped.
struct Series {
    kind: Option<IndexKind>,
    points: Vec<(f64, f64)>,
}

fn read_series(dataset: &NestedDataset, key: &Value, variable: &str, side: Side) -> Result<Series> {
    let site = dataset.site(key).ok_or_else(|| CubeError::UnmatchedKey {
        message: format!("{side} key {key} is not in the {side} dataset"),
    })?;
    let ts = site
        .ts()
        .ok_or_else(|| CubeError::shape(format!("{side} site {key} has no series of its own")))?;
    let col = ts.require_column(variable)?;

    let mut series = Series {
        kind: None,
        points: Vec::with_capacity(ts.height()),
    };
    for row in ts.rows() {
        let Some(value) = row[col].as_f64().filter(|v| v.is_finite()) else {
            continue;
        };
        let index = &row[0];
        let (Some(kind), Some(ordinal)) = (IndexKind::of(index), index.ordinal()) else {
            return Err(CubeError::shape(format!(
                "index {index} ({}) of {side} site {key} is not a time ordinal",
                index.type_name()
            )));
        };
        match series.kind {
            Some(existing) if existing != kind => {
                return Err(CubeError::shape(format!(
                    "{side} site {key} mixes calendar and numeric indexes"
                )));
            }
            _ => series.kind = Some(kind),
        }
        series.points.push((ordinal, value));
    }
    Ok(series)
}

/// Ordinals of the `n` largest values, ties to the earliest index.
fn peaks(points: &[(f64, f64)], n: usize) -> Vec<f64> {
    let mut ranked = points.to_vec();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.total_cmp(&b.0)));
    ranked.into_iter().take(n).map(|(ordinal, _)| ordinal).collect()
}

/// Dependent peaks inside at least one `[p - window/2, p + window/2]`.
fn count_matches(independent: &[f64], dependent: &[f64], window: f64) -> usize {
    let half = window / 2.0;
    dependent
        .iter()
        .filter(|&&d| independent.iter().any(|&p| d >= p - half && d <= p + half))
        .count()
}

/// Variable names compared on each side: `(major, minor)`.
fn resolve_variables(
    major: &NestedDataset,
    minor: &NestedDataset,
    options: &TemporalOptions,
) -> Result<(String, String)> {
    if let Some((minor_var, major_var)) = options.by.iter().next() {
        for (dataset, name) in [(major, major_var), (minor, minor_var)] {
            if !dataset.variant_columns().contains(name) {
                return Err(CubeError::ColumnNotFound {
                    column: name.clone(),
                });
            }
        }
        return Ok((major_var.clone(), minor_var.clone()));
    }
    let shared: Vec<&String> = major
        .variant_columns()
        .iter()
        .filter(|c| minor.variant_columns().contains(c))
        .collect();
    match shared.as_slice() {
        [single] => Ok(((*single).clone(), (*single).clone())),
        [] => Err(CubeError::UnmatchedKey {
            message: format!(
                "no variable shared by major [{}] and minor [{}]; map one with `by`",
                major.variant_columns().join(", "),
                minor.variant_columns().join(", ")
            ),
        }),
        many => Err(CubeError::invalid_option(
            "by",
            "",
            format!(
                "{} variables are shared ({}); pick one",
                many.len(),
                many.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
        )),
    }
}

/// Count peak agreement for every pair and drop pairs under `min_match`.
///
/// The independent side's `n_highest` peaks each open a window of width
/// `window`; `match_count` is the number of the dependent side's own peaks
/// falling inside any window. Pairs are processed in parallel and come out
/// in input order.
pub fn match_temporal(
    pairs: &[MatchPair],
    major: &NestedDataset,
    minor: &NestedDataset,
    options: &TemporalOptions,
) -> Result<Vec<MatchPair>> {
    options.validate()?;
    let _span = tracing::info_span!("match_temporal", pairs = pairs.len()).entered();
    let (major_var, minor_var) = resolve_variables(major, minor, options)?;

    let results: Vec<Result<Option<MatchPair>>> = pairs
        .par_iter()
        .map(|pair| {
            let major_series = read_series(major, &pair.major, &major_var, Side::Major)?;
            let minor_series = read_series(minor, &pair.minor, &minor_var, Side::Minor)?;
            if let (Some(a), Some(b)) = (major_series.kind, minor_series.kind)
                && a != b
            {
                return Err(CubeError::shape(format!(
                    "indexes of {} and {} cannot be compared",
                    pair.major, pair.minor
                )));
            }
            let (independent, dependent) = match options.independent {
                Side::Major => (&major_series, &minor_series),
                Side::Minor => (&minor_series, &major_series),
            };
            let count = count_matches(
                &peaks(&independent.points, options.n_highest),
                &peaks(&dependent.points, options.n_highest),
                options.window,
            );
            if count < options.min_match {
                return Ok(None);
            }
            Ok(Some(MatchPair {
                match_count: Some(count),
                ..pair.clone()
            }))
        })
        .collect();

    let mut kept = Vec::with_capacity(pairs.len());
    for result in results {
        if let Some(pair) = result? {
            kept.push(pair);
        }
    }
    tracing::debug!(
        pairs = pairs.len(),
        kept = kept.len(),
        variable = %major_var,
        "temporal filter applied"
    );
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_model::{Coordinates, CubeSchema, Site, Table};

    fn dataset(var: &str, sites: &[(&str, &[(i64, f64)])]) -> NestedDataset {
        let schema = CubeSchema::new("id", "day", Coordinates::default());
        let sites = sites
            .iter()
            .map(|&(key, obs)| {
                let rows = obs
                    .iter()
                    .map(|&(d, v)| vec![Value::Int(d), Value::Float(v)])
                    .collect();
                Site::series(
                    key,
                    vec![0.0.into(), 0.0.into()],
                    Table::with_rows(["day", var], rows).unwrap(),
                )
            })
            .collect();
        NestedDataset::new(schema, vec!["long".into(), "lat".into()], sites).unwrap()
    }

    /// Spikes of height 100 at `at`, background 0 elsewhere on days 0..30.
    fn spikes(at: &[i64]) -> Vec<(i64, f64)> {
        (0..30)
            .map(|d| (d, if at.contains(&d) { 100.0 } else { 0.0 }))
            .collect()
    }

    #[test]
    fn peaks_take_largest_then_earliest() {
        let points = [(1.0, 5.0), (2.0, 9.0), (3.0, 5.0), (4.0, 1.0)];
        assert_eq!(peaks(&points, 2), [2.0, 1.0]);
        assert_eq!(peaks(&points, 10).len(), 4);
    }

    #[test]
    fn windows_are_inclusive() {
        assert_eq!(count_matches(&[3.0, 10.0, 17.0], &[4.0, 9.0, 25.0], 4.0), 2);
        assert_eq!(count_matches(&[3.0], &[1.0, 5.0], 4.0), 2);
        assert_eq!(count_matches(&[3.0, 4.0], &[3.5], 4.0), 1);
    }

    #[test]
    fn counts_dependent_peaks_in_windows() {
        let ind = spikes(&[3, 10, 17]);
        let dep: Vec<(i64, f64)> = spikes(&[4, 9]);
        let mut dep = dep;
        dep.push((30, 100.0));
        let major = dataset("tmax", &[("A", &ind)]);
        let minor = dataset("tmax", &[("a", &dep)]);
        let options = TemporalOptions::new().with_n_highest(3).with_window(4.0);
        let pairs = vec![MatchPair::new(1, "A", "a")];

        let out = match_temporal(&pairs, &major, &minor, &options).unwrap();
        assert_eq!(out[0].match_count, Some(2));

        let strict = options.clone().with_min_match(3);
        assert!(match_temporal(&pairs, &major, &minor, &strict).unwrap().is_empty());
    }

    #[test]
    fn independent_side_opens_the_windows() {
        // One major peak between two minor peaks.
        let major = dataset("tmax", &[("A", &[(10, 100.0)])]);
        let minor = dataset("tmax", &[("a", &[(9, 90.0), (11, 80.0)])]);
        let pairs = vec![MatchPair::new(1, "A", "a")];
        let options = TemporalOptions::new().with_window(4.0);

        let by_major = match_temporal(&pairs, &major, &minor, &options).unwrap();
        assert_eq!(by_major[0].match_count, Some(2));

        let by_minor = options.with_independent(Side::Minor);
        let out = match_temporal(&pairs, &major, &minor, &by_minor).unwrap();
        assert_eq!(out[0].match_count, Some(1));
        assert!(
            match_temporal(&pairs, &major, &minor, &by_minor.with_min_match(2))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn by_maps_minor_variable() {
        let major = dataset("tmax", &[("A", &spikes(&[5]))]);
        let minor = dataset("temp", &[("a", &spikes(&[6]))]);
        let pairs = vec![MatchPair::new(1, "A", "a")];

        let err = match_temporal(&pairs, &major, &minor, &TemporalOptions::new()).unwrap_err();
        assert!(matches!(err, CubeError::UnmatchedKey { .. }));

        let options = TemporalOptions::new()
            .with_by("temp", "tmax")
            .with_n_highest(1);
        let out = match_temporal(&pairs, &major, &minor, &options).unwrap();
        assert_eq!(out[0].match_count, Some(1));

        let wrong = TemporalOptions::new().with_by("rain", "tmax");
        assert!(matches!(
            match_temporal(&pairs, &major, &minor, &wrong),
            Err(CubeError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn unknown_pair_keys() {
        let major = dataset("tmax", &[("A", &spikes(&[5]))]);
        let minor = dataset("tmax", &[("a", &spikes(&[5]))]);
        let pairs = vec![MatchPair::new(1, "A", "zz")];
        let err = match_temporal(&pairs, &major, &minor, &TemporalOptions::new()).unwrap_err();
        assert!(matches!(err, CubeError::UnmatchedKey { .. }));
    }

    #[test]
    fn calendar_and_numeric_indexes_do_not_mix() {
        let major = dataset("tmax", &[("A", &spikes(&[5]))]);
        let schema = CubeSchema::new("id", "day", Coordinates::default());
        let day = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let ts = Table::with_rows(["day", "tmax"], vec![vec![day.into(), 1.0.into()]]).unwrap();
        let minor = NestedDataset::new(
            schema,
            vec!["long".into(), "lat".into()],
            vec![Site::series("a", vec![0.0.into(), 0.0.into()], ts)],
        )
        .unwrap();
        let pairs = vec![MatchPair::new(1, "A", "a")];
        let err = match_temporal(&pairs, &major, &minor, &TemporalOptions::new()).unwrap_err();
        assert!(matches!(err, CubeError::ShapeMismatch { .. }));
    }
}
