//! End-to-end matching of two cubes.

use std::collections::{BTreeMap, HashMap, HashSet};

use cube_model::{CubeError, NestedDataset, Result, Site, Value};
use serde::Serialize;
use tracing::{debug, info_span, warn};

use crate::options::{MatchMode, MatchOptions, MatchPair, Side};
use crate::spatial::match_spatial;
use crate::temporal::match_temporal;

pub const GROUP_COLUMN: &str = "group";
pub const ROLE_COLUMN: &str = "role";
pub const DISTANCE_COLUMN: &str = "distance";
pub const MATCH_COUNT_COLUMN: &str = "match_count";

/// Keys present on only one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnmatchReport {
    pub major_only: Vec<Value>,
    pub minor_only: Vec<Value>,
}

impl UnmatchReport {
    pub fn is_empty(&self) -> bool {
        self.major_only.is_empty() && self.minor_only.is_empty()
    }
}

/// Non-fatal findings of a match run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchDiagnostics {
    /// Major keys absent from the minor dataset.
    pub major_only: usize,
    /// Minor keys absent from the major dataset.
    pub minor_only: usize,
    /// Major sites left without a pair.
    pub unmatched_major: usize,
    /// Minor sites left without a pair.
    pub unmatched_minor: usize,
}

impl MatchDiagnostics {
    /// True when every site found a partner.
    pub fn all_paired(&self) -> bool {
        self.unmatched_major == 0 && self.unmatched_minor == 0
    }

    /// True when there is nothing to warn about: every site is paired and
    /// no key is present on one side only.
    pub fn is_clean(&self) -> bool {
        self.all_paired() && self.major_only == 0 && self.minor_only == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Surviving sites of both sides, group by group.
    pub dataset: NestedDataset,
    pub pairs: Vec<MatchPair>,
    pub diagnostics: MatchDiagnostics,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(MatchResult),
    Unmatched(UnmatchReport),
}

impl MatchOutcome {
    pub fn into_matched(self) -> Option<MatchResult> {
        match self {
            MatchOutcome::Matched(result) => Some(result),
            MatchOutcome::Unmatched(_) => None,
        }
    }

    pub fn into_unmatched(self) -> Option<UnmatchReport> {
        match self {
            MatchOutcome::Unmatched(report) => Some(report),
            MatchOutcome::Matched(_) => None,
        }
    }
}

/// Keys of each side missing from the other, in dataset order.
pub fn unmatch(major: &NestedDataset, minor: &NestedDataset) -> UnmatchReport {
    let only = |a: &NestedDataset, b: &NestedDataset| -> Vec<Value> {
        a.keys().filter(|k| b.site(k).is_none()).cloned().collect()
    };
    UnmatchReport {
        major_only: only(major, minor),
        minor_only: only(minor, major),
    }
}

/// Match `minor` sites to `major` sites.
///
/// In [`MatchMode::Unmatch`] only the one-sided keys are reported. Otherwise
/// spatial matching (or the supplied pairs) is followed by temporal
/// matching when configured, and the survivors of both sides are assembled
/// into one dataset keyed and indexed like `major`.
pub fn match_sites(
    major: &NestedDataset,
    minor: &NestedDataset,
    options: &MatchOptions,
) -> Result<MatchOutcome> {
    options.validate()?;
    if options.mode == MatchMode::Unmatch {
        let report = unmatch(major, minor);
        debug!(
            major_only = report.major_only.len(),
            minor_only = report.minor_only.len(),
            "one-sided keys"
        );
        return Ok(MatchOutcome::Unmatched(report));
    }
    for (side, dataset) in [("major", major), ("minor", minor)] {
        if dataset.is_grouped() {
            return Err(CubeError::invalid_option(
                side,
                dataset.schema().key(),
                "matching needs ungrouped datasets",
            ));
        }
    }

    let _span = info_span!("match_sites", major = major.len(), minor = minor.len()).entered();
    let mut pairs = match (&options.spatial, &options.pairs) {
        (Some(spatial), _) => match_spatial(major, minor, spatial)?,
        (None, Some(pairs)) => pairs.clone(),
        (None, None) => {
            return Err(CubeError::invalid_option(
                "spatial",
                "disabled",
                "no pairs were supplied to match on",
            ));
        }
    };
    if let Some(temporal) = &options.temporal {
        pairs = match_temporal(&pairs, major, minor, temporal)?;
    }

    let diagnostics = diagnose(major, minor, &pairs);
    if !diagnostics.is_clean() {
        warn!(
            unmatched_major = diagnostics.unmatched_major,
            unmatched_minor = diagnostics.unmatched_minor,
            major_only = diagnostics.major_only,
            minor_only = diagnostics.minor_only,
            "one-sided keys or sites left without a partner"
        );
    }
    let by = options.temporal.as_ref().map(|t| &t.by);
    let dataset = assemble(major, minor, &pairs, by, options.temporal.is_some())?;
    debug!(pairs = pairs.len(), sites = dataset.len(), "match assembled");

    Ok(MatchOutcome::Matched(MatchResult {
        dataset,
        pairs,
        diagnostics,
    }))
}

fn diagnose(major: &NestedDataset, minor: &NestedDataset, pairs: &[MatchPair]) -> MatchDiagnostics {
    let report = unmatch(major, minor);
    let paired_major: HashSet<&Value> = pairs.iter().map(|p| &p.major).collect();
    let paired_minor: HashSet<&Value> = pairs.iter().map(|p| &p.minor).collect();
    MatchDiagnostics {
        major_only: report.major_only.len(),
        minor_only: report.minor_only.len(),
        unmatched_major: major.keys().filter(|k| !paired_major.contains(k)).count(),
        unmatched_minor: minor.keys().filter(|k| !paired_minor.contains(k)).count(),
    }
}

fn major_key(pair: &MatchPair) -> &Value {
    &pair.major
}

fn minor_key(pair: &MatchPair) -> &Value {
    &pair.minor
}

fn distance_rank(pair: &MatchPair) -> f64 {
    pair.distance.unwrap_or(f64::INFINITY)
}

/// Position of each key's nearest pair; ties to the earlier pair.
fn home_pairs<'a>(pairs: &'a [MatchPair], key_of: fn(&MatchPair) -> &Value) -> HashMap<&'a Value, usize> {
    let mut homes: HashMap<&Value, usize> = HashMap::new();
    for (pos, pair) in pairs.iter().enumerate() {
        let key = key_of(pair);
        match homes.get(key) {
            Some(&home) if distance_rank(&pairs[home]) <= distance_rank(pair) => {}
            _ => {
                homes.insert(key, pos);
            }
        }
    }
    homes
}

/// How one side's columns land in the combined dataset.
struct SideLayout<'a> {
    dataset: &'a NestedDataset,
    side: Side,
    /// Own spatial column feeding each combined spatial column.
    spatial: Vec<Option<usize>>,
    /// Own ts column name -> combined ts column name.
    ts_names: HashMap<String, String>,
    with_match_count: bool,
}

impl<'a> SideLayout<'a> {
    /// `own` holds this side's spatial column names as they appear in
    /// `combined`.
    fn new(
        dataset: &'a NestedDataset,
        side: Side,
        own: Vec<String>,
        combined: &[String],
        ts_names: HashMap<String, String>,
        with_match_count: bool,
    ) -> Self {
        Self {
            dataset,
            side,
            spatial: combined
                .iter()
                .map(|name| own.iter().position(|c| c == name))
                .collect(),
            ts_names,
            with_match_count,
        }
    }

    fn site(&self, key: &Value, pair: &MatchPair, ts_columns: &[String]) -> Result<Site> {
        let site = self.dataset.site(key).ok_or_else(|| CubeError::UnmatchedKey {
            message: format!("{} key {key} is not in the {} dataset", self.side, self.side),
        })?;
        let ts = site
            .ts()
            .ok_or_else(|| CubeError::shape(format!("{} site {key} has no series", self.side)))?;
        let ts = ts
            .rename_columns(|name| self.ts_names.get(name).cloned())?
            .align_to(ts_columns)?;

        let mut attributes = Vec::with_capacity(self.spatial.len() + 4);
        attributes.extend(
            self.spatial
                .iter()
                .map(|idx| idx.map_or(Value::Null, |i| site.attributes()[i].clone())),
        );
        attributes.push(Value::from(pair.group));
        attributes.push(Value::from(self.side.to_string()));
        attributes.push(pair.distance.map_or(Value::Null, Value::from));
        if self.with_match_count {
            attributes.push(pair.match_count.map_or(Value::Null, Value::from));
        }
        Ok(Site::series(key.clone(), attributes, ts))
    }
}

fn assemble(
    major: &NestedDataset,
    minor: &NestedDataset,
    pairs: &[MatchPair],
    by: Option<&BTreeMap<String, String>>,
    with_match_count: bool,
) -> Result<NestedDataset> {
    let schema = major.schema();
    let major_coords = schema.coordinates();
    let minor_coords = minor.schema().coordinates();
    let minor_spatial_name = |name: &str| -> String {
        if name == minor_coords.longitude {
            major_coords.longitude.clone()
        } else if name == minor_coords.latitude {
            major_coords.latitude.clone()
        } else {
            name.to_string()
        }
    };

    // Spatial columns: major's, then minor-only ones, then the match tags.
    let mut spatial = major.spatial_columns().to_vec();
    for name in minor.spatial_columns() {
        let mapped = minor_spatial_name(name);
        if !spatial.contains(&mapped) {
            spatial.push(mapped);
        }
    }
    let shared_width = spatial.len();
    let mut tags = vec![GROUP_COLUMN, ROLE_COLUMN, DISTANCE_COLUMN];
    if with_match_count {
        tags.push(MATCH_COUNT_COLUMN);
    }

    // Ts columns: major's, then minor-only ones after renaming.
    let major_ts_names: HashMap<String, String> = major
        .ts_columns()
        .iter()
        .map(|c| (c.clone(), c.clone()))
        .collect();
    let minor_ts_names: HashMap<String, String> = minor
        .ts_columns()
        .iter()
        .map(|name| {
            let renamed = if name == minor.schema().index() {
                schema.index().to_string()
            } else {
                by.and_then(|by| by.get(name)).cloned().unwrap_or_else(|| name.clone())
            };
            (name.clone(), renamed)
        })
        .collect();
    let mut claimed: HashMap<&str, &str> = HashMap::new();
    for name in minor.ts_columns() {
        let renamed = minor_ts_names[name].as_str();
        if let Some(first) = claimed.insert(renamed, name) {
            let option = if renamed == schema.index() { "index" } else { "by" };
            return Err(CubeError::invalid_option(
                option,
                format!("{first}, {name} -> {renamed}"),
                format!("minor columns '{first}' and '{name}' would both be named '{renamed}'"),
            ));
        }
    }
    let mut ts_columns = major.ts_columns().to_vec();
    for name in minor.ts_columns() {
        let renamed = &minor_ts_names[name];
        if !ts_columns.contains(renamed) {
            ts_columns.push(renamed.clone());
        }
    }
    for tag in &tags {
        if spatial.iter().any(|c| c == tag) || ts_columns.iter().any(|c| c == tag) {
            return Err(CubeError::DuplicateColumn {
                column: tag.to_string(),
            });
        }
    }
    spatial.extend(tags.iter().map(|t| t.to_string()));

    let combined = &spatial[..shared_width];
    let major_layout = SideLayout::new(
        major,
        Side::Major,
        major.spatial_columns().to_vec(),
        combined,
        major_ts_names,
        with_match_count,
    );
    let minor_layout = SideLayout::new(
        minor,
        Side::Minor,
        minor
            .spatial_columns()
            .iter()
            .map(|c| minor_spatial_name(c))
            .collect(),
        combined,
        minor_ts_names,
        with_match_count,
    );

    let major_homes = home_pairs(pairs, major_key);
    let minor_homes = home_pairs(pairs, minor_key);

    // Pair positions bucketed by group, groups in first-appearance order.
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_slot: HashMap<usize, usize> = HashMap::new();
    for (pos, pair) in pairs.iter().enumerate() {
        let slot = *group_slot.entry(pair.group).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(pos);
    }

    let mut sites = Vec::new();
    for members in &groups {
        for &pos in members {
            let pair = &pairs[pos];
            if major_homes.get(&pair.major) == Some(&pos) {
                sites.push(major_layout.site(&pair.major, pair, &ts_columns)?);
            }
        }
        let mut minors: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&pos| minor_homes.get(&pairs[pos].minor) == Some(&pos))
            .collect();
        minors.sort_by(|&a, &b| distance_rank(&pairs[a]).total_cmp(&distance_rank(&pairs[b])));
        for pos in minors {
            let pair = &pairs[pos];
            sites.push(minor_layout.site(&pair.minor, pair, &ts_columns)?);
        }
    }

    NestedDataset::new(schema.clone(), spatial, sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{SpatialOptions, TemporalOptions};
    use cube_model::{Coordinates, CubeSchema, Table};
    use std::sync::{Arc, Mutex};

    /// Sites with a 30-day series of `var`, spiking to 100 on the given days.
    fn panel(var: &str, points: &[(&str, f64, f64, &[i64])]) -> NestedDataset {
        let schema = CubeSchema::new("id", "day", Coordinates::default());
        let sites = points
            .iter()
            .map(|&(key, lon, lat, spikes)| {
                let rows = (0..30)
                    .map(|d| {
                        let v = if spikes.contains(&d) { 100.0 } else { 0.0 };
                        vec![Value::Int(d), Value::Float(v)]
                    })
                    .collect();
                Site::series(
                    key,
                    vec![lon.into(), lat.into()],
                    Table::with_rows(["day", var], rows).unwrap(),
                )
            })
            .collect();
        NestedDataset::new(schema, vec!["long".into(), "lat".into()], sites).unwrap()
    }

    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Result of `run` plus the warnings it logged, without colors.
    fn with_warnings<T>(run: impl FnOnce() -> T) -> (T, String) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || LogBuffer(Arc::clone(&sink)))
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, run);
        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        (out, logs)
    }

    fn keys(dataset: &NestedDataset) -> Vec<String> {
        dataset.keys().map(ToString::to_string).collect()
    }

    fn column(dataset: &NestedDataset, name: &str) -> Vec<Value> {
        (0..dataset.len())
            .map(|pos| dataset.attribute(pos, name).cloned().unwrap())
            .collect()
    }

    #[test]
    fn nearest_pairs_form_groups() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[]), ("B", 10.0, 0.0, &[])]);
        let minor = panel(
            "tmax",
            &[("a", 0.0, 1.0, &[]), ("b", 9.0, 0.0, &[]), ("c", 20.0, 20.0, &[])],
        );
        let options = MatchOptions::new().with_spatial(SpatialOptions::new().with_dist_max(200.0));
        let result = match_sites(&major, &minor, &options)
            .unwrap()
            .into_matched()
            .unwrap();

        assert_eq!(keys(&result.dataset), ["A", "a", "B", "b"]);
        assert_eq!(
            column(&result.dataset, GROUP_COLUMN),
            [Value::from(1usize), Value::from(1usize), Value::from(2usize), Value::from(2usize)]
        );
        assert_eq!(
            column(&result.dataset, ROLE_COLUMN),
            [Value::from("major"), Value::from("minor"), Value::from("major"), Value::from("minor")]
        );
        assert!(!result.dataset.spatial_columns().iter().any(|c| c == MATCH_COUNT_COLUMN));
        assert_eq!(result.dataset.ts_columns(), ["day", "tmax"]);
        assert_eq!(result.diagnostics.unmatched_minor, 1);
        assert_eq!(result.diagnostics.unmatched_major, 0);
        assert_eq!(result.dataset.observation_count(), 4 * 30);
    }

    #[test]
    fn one_sided_keys_are_warned_even_when_all_sites_pair() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[])]);
        let minor = panel("tmax", &[("a", 0.0, 0.05, &[])]);
        let (result, logs) = with_warnings(|| match_sites(&major, &minor, &MatchOptions::new()));
        let diagnostics = result.unwrap().into_matched().unwrap().diagnostics;

        assert!(diagnostics.all_paired());
        assert!(!diagnostics.is_clean());
        assert_eq!((diagnostics.major_only, diagnostics.minor_only), (1, 1));
        assert!(logs.contains("major_only=1"), "{logs}");
        assert!(logs.contains("minor_only=1"), "{logs}");
        assert!(MatchDiagnostics::default().is_clean());
    }

    #[test]
    fn temporal_filter_and_renamed_variables() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[3, 10, 17]), ("B", 10.0, 0.0, &[3, 10, 17])]);
        let minor = panel(
            "temp",
            &[("a", 0.0, 1.0, &[4, 9, 25]), ("b", 9.0, 0.0, &[25, 26, 27])],
        );
        let options = MatchOptions::new()
            .with_spatial(SpatialOptions::new().with_dist_max(200.0))
            .with_temporal(
                TemporalOptions::new()
                    .with_by("temp", "tmax")
                    .with_n_highest(3)
                    .with_window(4.0)
                    .with_min_match(2),
            );
        let result = match_sites(&major, &minor, &options)
            .unwrap()
            .into_matched()
            .unwrap();

        assert_eq!(result.pairs.len(), 1);
        assert_eq!(result.pairs[0].match_count, Some(2));
        assert_eq!(keys(&result.dataset), ["A", "a"]);
        assert_eq!(result.dataset.ts_columns(), ["day", "tmax"]);
        assert_eq!(
            column(&result.dataset, MATCH_COUNT_COLUMN),
            [Value::from(2usize), Value::from(2usize)]
        );
        assert_eq!(result.diagnostics.unmatched_major, 1);
    }

    #[test]
    fn renamed_variable_must_not_shadow_a_minor_column() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[3])]);
        let ts = Table::with_rows(
            ["day", "temp", "tmax"],
            (0..30)
                .map(|d| vec![Value::Int(d), Value::Float(f64::from(d == 3)), Value::Null])
                .collect(),
        )
        .unwrap();
        let minor = NestedDataset::new(
            CubeSchema::new("id", "day", Coordinates::default()),
            vec!["long".into(), "lat".into()],
            vec![Site::series("a", vec![0.0.into(), 0.05.into()], ts)],
        )
        .unwrap();
        let options = MatchOptions::new()
            .with_temporal(TemporalOptions::new().with_by("temp", "tmax").with_n_highest(1));

        let err = match_sites(&major, &minor, &options).unwrap_err();
        assert!(matches!(err, CubeError::InvalidOption { option: "by", .. }));
        insta::assert_snapshot!(
            err.to_string(),
            @"invalid option by = temp, tmax -> tmax: minor columns 'temp' and 'tmax' would both be named 'tmax'"
        );
    }

    #[test]
    fn ts_columns_are_unioned() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[])]);
        let minor = panel("prcp", &[("a", 0.0, 0.5, &[])]);
        let options = MatchOptions::new().with_spatial(SpatialOptions::new().with_dist_max(100.0));
        let result = match_sites(&major, &minor, &options)
            .unwrap()
            .into_matched()
            .unwrap();
        assert_eq!(result.dataset.ts_columns(), ["day", "tmax", "prcp"]);
        let minor_ts = result.dataset.site(&"a".into()).unwrap().ts().unwrap();
        assert_eq!(minor_ts.value(0, "tmax"), Some(&Value::Null));
        assert_eq!(minor_ts.value(0, "prcp"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn minor_in_several_groups_is_emitted_once() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[]), ("B", 0.5, 0.0, &[])]);
        let minor = panel("tmax", &[("a", 0.4, 0.0, &[])]);
        let options = MatchOptions::new().with_spatial(SpatialOptions::new().with_dist_max(100.0));
        let result = match_sites(&major, &minor, &options)
            .unwrap()
            .into_matched()
            .unwrap();
        assert_eq!(result.pairs.len(), 2);
        assert_eq!(keys(&result.dataset), ["A", "B", "a"]);
        assert_eq!(
            result.dataset.attribute(2, GROUP_COLUMN),
            Some(&Value::from(2usize))
        );
    }

    #[test]
    fn supplied_pairs_skip_spatial_matching() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[])]);
        let minor = panel("tmax", &[("far", 120.0, 40.0, &[])]);
        let options = MatchOptions::new().with_pairs(vec![MatchPair::new(7, "A", "far")]);
        let result = match_sites(&major, &minor, &options)
            .unwrap()
            .into_matched()
            .unwrap();
        assert_eq!(keys(&result.dataset), ["A", "far"]);
        assert_eq!(result.dataset.attribute(0, DISTANCE_COLUMN), Some(&Value::Null));

        let options = MatchOptions::new().with_pairs(vec![MatchPair::new(1, "A", "nope")]);
        assert!(matches!(
            match_sites(&major, &minor, &options),
            Err(CubeError::UnmatchedKey { .. })
        ));
    }

    #[test]
    fn shared_keys_collide() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[])]);
        let minor = panel("tmax", &[("A", 0.0, 0.1, &[])]);
        let err = match_sites(&major, &minor, &MatchOptions::new()).unwrap_err();
        assert!(matches!(err, CubeError::DuplicateKey { .. }));
    }

    #[test]
    fn unmatch_reports_one_sided_keys() {
        let major = panel("tmax", &[("A", 0.0, 0.0, &[]), ("B", 1.0, 0.0, &[])]);
        let minor = panel("tmax", &[("B", 1.0, 0.0, &[]), ("D", 2.0, 0.0, &[])]);
        let options = MatchOptions {
            spatial: None,
            ..MatchOptions::new().with_mode(MatchMode::Unmatch)
        };
        let report = match_sites(&major, &minor, &options)
            .unwrap()
            .into_unmatched()
            .unwrap();
        assert_eq!(report.major_only, [Value::from("A")]);
        assert_eq!(report.minor_only, [Value::from("D")]);
    }

    #[test]
    fn grouped_inputs_are_rejected() {
        let flat = panel("tmax", &[("A", 0.0, 0.0, &[])]);
        let region = flat.clone().derive_attribute("region", |_| "north".into()).unwrap();
        let grouped = cube_transform::switch_key(&region, "region").unwrap();
        let err = match_sites(&grouped, &flat, &MatchOptions::new()).unwrap_err();
        assert!(matches!(err, CubeError::InvalidOption { option: "major", .. }));
    }
}
