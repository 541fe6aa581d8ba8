//! Spatial matching: distance matrix and nearest-site filtering.

use std::collections::HashMap;

use cube_model::{NestedDataset, Result};
use rayon::prelude::*;

use crate::geodesic::vincenty_distance_km;
use crate::options::{MatchPair, SpatialOptions};

/// Dense `major × minor` distances in kilometres, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, major: usize, minor: usize) -> Option<f64> {
        if major < self.rows && minor < self.cols {
            Some(self.data[major * self.cols + minor])
        } else {
            None
        }
    }

    /// Distances from one major site to every minor site.
    pub fn row(&self, major: usize) -> Option<&[f64]> {
        (major < self.rows).then(|| &self.data[major * self.cols..(major + 1) * self.cols])
    }
}

fn site_coordinates(dataset: &NestedDataset) -> Result<Vec<(f64, f64)>> {
    (0..dataset.len())
        .map(|pos| dataset.coordinates(pos))
        .collect()
}

/// Distance from every major site to every minor site.
///
/// Memory grows with `|major| × |minor|`; split the inputs into chunks of a
/// few thousand sites each beyond that. Rows are computed in parallel.
pub fn distance_matrix(major: &NestedDataset, minor: &NestedDataset) -> Result<DistanceMatrix> {
    let from = site_coordinates(major)?;
    let to = site_coordinates(minor)?;

    let rows: Vec<Vec<f64>> = from
        .par_iter()
        .map(|&(lon1, lat1)| {
            to.iter()
                .map(|&(lon2, lat2)| vincenty_distance_km(lon1, lat1, lon2, lat2))
                .collect()
        })
        .collect();

    Ok(DistanceMatrix {
        rows: from.len(),
        cols: to.len(),
        data: rows.concat(),
    })
}

/// Pair major sites with their nearest minor sites.
///
/// Filters run in a fixed order: the `n_keep` nearest minors per major
/// (ties by minor order), then the `dist_max` cap, then `single_match`
/// (each minor keeps its nearest major, ties to the earlier major). Majors
/// left without a pair are dropped; the rest get group ids `1..=n` in major
/// order. Pairs come out by group, nearest first.
pub fn match_spatial(
    major: &NestedDataset,
    minor: &NestedDataset,
    options: &SpatialOptions,
) -> Result<Vec<MatchPair>> {
    options.validate()?;
    let _span = tracing::info_span!("match_spatial", major = major.len(), minor = minor.len())
        .entered();
    let matrix = distance_matrix(major, minor)?;

    // (major, minor, distance)
    let mut kept: Vec<(usize, usize, f64)> = Vec::new();
    for (i, row) in (0..matrix.rows()).filter_map(|i| Some((i, matrix.row(i)?))) {
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by(|&a, &b| row[a].total_cmp(&row[b]));
        kept.extend(order.into_iter().take(options.n_keep).map(|j| (i, j, row[j])));
    }
    let nearest = kept.len();

    kept.retain(|&(_, _, d)| d <= options.dist_max);
    let capped = kept.len();

    if options.single_match {
        let mut best: HashMap<usize, (usize, f64)> = HashMap::new();
        for &(i, j, d) in &kept {
            match best.get(&j) {
                Some(&(_, current)) if current <= d => {}
                _ => {
                    best.insert(j, (i, d));
                }
            }
        }
        kept.retain(|&(i, j, _)| best.get(&j).is_some_and(|&(owner, _)| owner == i));
    }

    // kept is ordered by major, then distance
    let mut groups: Vec<Vec<(usize, usize, f64)>> = Vec::new();
    for pair in kept {
        match groups.last_mut() {
            Some(group) if group[0].0 == pair.0 => group.push(pair),
            _ => groups.push(vec![pair]),
        }
    }
    if let Some(limit) = options.n_group
        && groups.len() > limit
    {
        let mut ranked: Vec<usize> = (0..groups.len()).collect();
        ranked.sort_by(|&a, &b| groups[a][0].2.total_cmp(&groups[b][0].2));
        let mut keep = vec![false; groups.len()];
        for &g in ranked.iter().take(limit) {
            keep[g] = true;
        }
        let mut flags = keep.into_iter();
        groups.retain(|_| flags.next().unwrap_or(false));
    }

    let majors = major.sites();
    let minors = minor.sites();
    let pairs: Vec<MatchPair> = groups
        .iter()
        .enumerate()
        .flat_map(|(g, members)| {
            members.iter().map(move |&(i, j, d)| MatchPair {
                group: g + 1,
                major: majors[i].key().clone(),
                minor: minors[j].key().clone(),
                distance: Some(d),
                match_count: None,
            })
        })
        .collect();

    tracing::debug!(
        nearest,
        within_cap = capped,
        pairs = pairs.len(),
        groups = groups.len(),
        "spatial filters applied"
    );
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_model::{Coordinates, CubeError, CubeSchema, Site, Table, Value};

    fn sites(points: &[(&str, f64, f64)]) -> NestedDataset {
        let schema = CubeSchema::new("id", "date", Coordinates::default());
        let sites = points
            .iter()
            .map(|&(key, lon, lat)| {
                Site::series(key, vec![lon.into(), lat.into()], Table::new(["date"]).unwrap())
            })
            .collect();
        NestedDataset::new(schema, vec!["long".into(), "lat".into()], sites).unwrap()
    }

    fn summary(pairs: &[MatchPair]) -> Vec<(usize, String, String)> {
        pairs
            .iter()
            .map(|p| (p.group, p.major.to_string(), p.minor.to_string()))
            .collect()
    }

    #[test]
    fn nearest_minor_per_major() {
        let major = sites(&[("A", 0.0, 0.0), ("B", 10.0, 0.0)]);
        let minor = sites(&[("a", 0.0, 1.0), ("b", 9.0, 0.0), ("c", 20.0, 20.0)]);
        let options = SpatialOptions::new().with_dist_max(200.0);
        let pairs = match_spatial(&major, &minor, &options).unwrap();
        assert_eq!(
            summary(&pairs),
            [
                (1, "A".to_string(), "a".to_string()),
                (2, "B".to_string(), "b".to_string())
            ]
        );
        assert!((pairs[0].distance.unwrap() - 110.574).abs() < 0.01);
    }

    #[test]
    fn distance_cap_drops_majors() {
        let major = sites(&[("A", 0.0, 0.0), ("B", 10.0, 0.0)]);
        let minor = sites(&[("a", 0.0, 1.0), ("b", 9.0, 0.0)]);
        let options = SpatialOptions::new().with_dist_max(111.0);
        let pairs = match_spatial(&major, &minor, &options).unwrap();
        assert_eq!(summary(&pairs), [(1, "A".to_string(), "a".to_string())]);
    }

    #[test]
    fn ties_keep_minor_order() {
        let major = sites(&[("A", 0.0, 0.0)]);
        let minor = sites(&[("n", 0.0, 1.0), ("s", 0.0, 1.0), ("e", 0.0, -2.0)]);
        let options = SpatialOptions::new().with_n_keep(2).with_dist_max(500.0);
        let pairs = match_spatial(&major, &minor, &options).unwrap();
        let minors: Vec<String> = pairs.iter().map(|p| p.minor.to_string()).collect();
        assert_eq!(minors, ["n", "s"]);
    }

    #[test]
    fn single_match_prefers_nearest_then_earlier_major() {
        let major = sites(&[("A", -1.0, 0.0), ("B", 1.0, 0.0), ("C", 0.5, 0.0)]);
        let minor = sites(&[("m", 0.0, 0.0)]);
        let options = SpatialOptions::new()
            .with_dist_max(500.0)
            .with_single_match(true);
        let pairs = match_spatial(&major, &minor, &options).unwrap();
        assert_eq!(summary(&pairs), [(1, "C".to_string(), "m".to_string())]);

        let tied = sites(&[("A", 1.0, 0.0), ("B", 1.0, 0.0)]);
        let pairs = match_spatial(&tied, &minor, &options).unwrap();
        assert_eq!(summary(&pairs), [(1, "A".to_string(), "m".to_string())]);
    }

    #[test]
    fn n_group_keeps_closest_groups() {
        let major = sites(&[("A", 0.0, 0.0), ("B", 10.0, 0.0), ("C", 20.0, 0.0)]);
        let minor = sites(&[("a", 0.0, 0.5), ("b", 10.0, 0.1), ("c", 20.0, 0.3)]);
        let options = SpatialOptions::new().with_dist_max(100.0).with_n_group(2);
        let pairs = match_spatial(&major, &minor, &options).unwrap();
        assert_eq!(
            summary(&pairs),
            [
                (1, "B".to_string(), "b".to_string()),
                (2, "C".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn matrix_layout() {
        let major = sites(&[("A", 0.0, 0.0), ("B", 1.0, 0.0)]);
        let minor = sites(&[("a", 0.0, 0.0), ("b", 0.0, 1.0), ("c", 1.0, 0.0)]);
        let matrix = distance_matrix(&major, &minor).unwrap();
        assert_eq!((matrix.rows(), matrix.cols()), (2, 3));
        assert_eq!(matrix.get(0, 0), Some(0.0));
        assert_eq!(matrix.get(1, 2), Some(0.0));
        assert_eq!(matrix.get(2, 0), None);
        assert_eq!(matrix.row(1).map(<[f64]>::len), Some(3));
        assert_eq!(matrix.row(matrix.rows()), None);
    }

    #[test]
    fn bad_coordinates_are_reported() {
        let schema = CubeSchema::new("id", "date", Coordinates::default());
        let site = Site::series(
            "A",
            vec![Value::from("east"), 0.0.into()],
            Table::new(["date"]).unwrap(),
        );
        let major = NestedDataset::new(schema, vec!["long".into(), "lat".into()], vec![site])
            .unwrap();
        let minor = sites(&[("a", 0.0, 0.0)]);
        let err = match_spatial(&major, &minor, &SpatialOptions::default()).unwrap_err();
        assert!(matches!(err, CubeError::InvalidValue { .. }));
    }
}
