//! Configuration options for site matching.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cube_model::{CubeError, Result, Value};
use serde::{Deserialize, Serialize};

/// Options for spatial matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialOptions {
    /// Nearest minor sites kept per major site (at least 1).
    pub n_keep: usize,

    /// Largest distance kept, in kilometres.
    pub dist_max: f64,

    /// Let each minor site keep only its nearest major site.
    pub single_match: bool,

    /// Keep only this many groups, closest first.
    pub n_group: Option<usize>,
}

impl Default for SpatialOptions {
    fn default() -> Self {
        Self {
            n_keep: 1,
            dist_max: 10.0,
            single_match: false,
            n_group: None,
        }
    }
}

impl SpatialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_keep(mut self, n_keep: usize) -> Self {
        self.n_keep = n_keep;
        self
    }

    pub fn with_dist_max(mut self, dist_max: f64) -> Self {
        self.dist_max = dist_max;
        self
    }

    pub fn with_single_match(mut self, single_match: bool) -> Self {
        self.single_match = single_match;
        self
    }

    pub fn with_n_group(mut self, n_group: usize) -> Self {
        self.n_group = Some(n_group);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_keep == 0 {
            return Err(CubeError::invalid_option("n_keep", self.n_keep, "must be at least 1"));
        }
        if !self.dist_max.is_finite() || self.dist_max < 0.0 {
            return Err(CubeError::invalid_option(
                "dist_max",
                self.dist_max,
                "must be a finite distance of at least 0",
            ));
        }
        if self.n_group == Some(0) {
            return Err(CubeError::invalid_option("n_group", 0, "must be at least 1"));
        }
        Ok(())
    }
}

/// Which side of a pair drives peak extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Major,
    Minor,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Major => "major",
            Side::Minor => "minor",
        })
    }
}

impl FromStr for Side {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(Side::Major),
            "minor" => Ok(Side::Minor),
            _ => Err(CubeError::invalid_option(
                "independent",
                s,
                "expected 'major' or 'minor'",
            )),
        }
    }
}

/// Options for temporal matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalOptions {
    /// Minor variable name -> major variable name. Empty when both sides
    /// share their only variable.
    pub by: BTreeMap<String, String>,

    /// Side whose peaks define the windows.
    pub independent: Side,

    /// Peaks taken from each series (at least 1).
    pub n_highest: usize,

    /// Full width of the window around each peak, in index units
    /// (days for date indexes).
    pub window: f64,

    /// Pairs with fewer matched peaks are dropped.
    pub min_match: usize,
}

impl Default for TemporalOptions {
    fn default() -> Self {
        Self {
            by: BTreeMap::new(),
            independent: Side::Major,
            n_highest: 20,
            window: 5.0,
            min_match: 0,
        }
    }
}

impl TemporalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_by(mut self, minor: impl Into<String>, major: impl Into<String>) -> Self {
        self.by.insert(minor.into(), major.into());
        self
    }

    pub fn with_independent(mut self, independent: Side) -> Self {
        self.independent = independent;
        self
    }

    pub fn with_n_highest(mut self, n_highest: usize) -> Self {
        self.n_highest = n_highest;
        self
    }

    pub fn with_window(mut self, window: f64) -> Self {
        self.window = window;
        self
    }

    pub fn with_min_match(mut self, min_match: usize) -> Self {
        self.min_match = min_match;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_highest == 0 {
            return Err(CubeError::invalid_option(
                "n_highest",
                self.n_highest,
                "must be at least 1",
            ));
        }
        if !self.window.is_finite() || self.window <= 0.0 {
            return Err(CubeError::invalid_option(
                "window",
                self.window,
                "must be a finite width greater than 0",
            ));
        }
        if self.by.len() > 1 {
            let pairs: Vec<String> = self.by.iter().map(|(k, v)| format!("{k}->{v}")).collect();
            return Err(CubeError::invalid_option(
                "by",
                pairs.join(", "),
                "only one variable can be compared",
            ));
        }
        Ok(())
    }
}

/// What [`match_sites`](crate::match_sites) returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Full match: pairs plus the combined dataset.
    #[default]
    Match,
    /// Only the keys present on one side.
    Unmatch,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchMode::Match => "match",
            MatchMode::Unmatch => "unmatch",
        })
    }
}

impl FromStr for MatchMode {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "match" => Ok(MatchMode::Match),
            "unmatch" => Ok(MatchMode::Unmatch),
            _ => Err(CubeError::invalid_option(
                "mode",
                s,
                "expected 'match' or 'unmatch'",
            )),
        }
    }
}

/// A major site linked to a minor site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    /// Groups the major site with all of its minor sites.
    pub group: usize,
    pub major: Value,
    pub minor: Value,
    /// Kilometres; absent when spatial matching did not run.
    #[serde(default)]
    pub distance: Option<f64>,
    /// Matched peaks; absent when temporal matching did not run.
    #[serde(default)]
    pub match_count: Option<usize>,
}

impl MatchPair {
    pub fn new(group: usize, major: impl Into<Value>, minor: impl Into<Value>) -> Self {
        Self {
            group,
            major: major.into(),
            minor: minor.into(),
            distance: None,
            match_count: None,
        }
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }
}

/// Options for [`match_sites`](crate::match_sites).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Spatial matching; `None` disables it in favour of `pairs`.
    pub spatial: Option<SpatialOptions>,

    /// Pre-computed pairs, used when spatial matching is disabled.
    pub pairs: Option<Vec<MatchPair>>,

    /// Temporal matching on the spatial survivors.
    pub temporal: Option<TemporalOptions>,

    pub mode: MatchMode,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            spatial: Some(SpatialOptions::default()),
            pairs: None,
            temporal: None,
            mode: MatchMode::Match,
        }
    }
}

impl MatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spatial(mut self, spatial: SpatialOptions) -> Self {
        self.spatial = Some(spatial);
        self
    }

    /// Skip spatial matching and use `pairs` as they are.
    pub fn with_pairs(mut self, pairs: Vec<MatchPair>) -> Self {
        self.spatial = None;
        self.pairs = Some(pairs);
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalOptions) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode == MatchMode::Unmatch {
            return Ok(());
        }
        match (&self.spatial, &self.pairs) {
            (Some(spatial), _) => spatial.validate()?,
            (None, Some(_)) => {}
            (None, None) => {
                return Err(CubeError::invalid_option(
                    "spatial",
                    "disabled",
                    "no pairs were supplied to match on",
                ));
            }
        }
        if let Some(temporal) = &self.temporal {
            temporal.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let spatial = SpatialOptions::default();
        assert_eq!(spatial.n_keep, 1);
        assert_eq!(spatial.dist_max, 10.0);
        assert!(!spatial.single_match);

        let temporal = TemporalOptions::default();
        assert_eq!(temporal.n_highest, 20);
        assert_eq!(temporal.window, 5.0);
        assert_eq!(temporal.independent, Side::Major);

        assert!(MatchOptions::default().validate().is_ok());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("match".parse::<MatchMode>().unwrap(), MatchMode::Match);
        assert_eq!(" Unmatch ".parse::<MatchMode>().unwrap(), MatchMode::Unmatch);
        let err = "pair".parse::<MatchMode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid option mode = pair: expected 'match' or 'unmatch'"
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(SpatialOptions::new().with_n_keep(0).validate().is_err());
        assert!(SpatialOptions::new().with_dist_max(-1.0).validate().is_err());
        assert!(SpatialOptions::new().with_dist_max(f64::NAN).validate().is_err());
        assert!(TemporalOptions::new().with_window(0.0).validate().is_err());
        assert!(TemporalOptions::new().with_n_highest(0).validate().is_err());
        assert!(
            TemporalOptions::new()
                .with_by("prcp", "rain")
                .with_by("tmin", "tmax")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn disabling_spatial_needs_pairs() {
        let options = MatchOptions {
            spatial: None,
            ..MatchOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(CubeError::InvalidOption { option: "spatial", .. })
        ));
        let options = MatchOptions::new().with_pairs(vec![MatchPair::new(1, "A", "a")]);
        assert!(options.validate().is_ok());
        assert!(
            MatchOptions {
                spatial: None,
                mode: MatchMode::Unmatch,
                ..MatchOptions::default()
            }
            .validate()
            .is_ok()
        );
    }
}
