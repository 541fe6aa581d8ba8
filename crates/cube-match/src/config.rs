//! TOML configuration for site matching.

use std::path::Path;

use cube_model::{CubeError, Result};
use serde::{Deserialize, Serialize};

use crate::options::{MatchMode, MatchOptions, SpatialOptions, TemporalOptions};

/// `[spatial]` table; unset fields keep the [`SpatialOptions`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpatialSection {
    /// `false` turns spatial matching off; pairs must then be supplied.
    pub enabled: Option<bool>,
    pub n_keep: Option<usize>,
    pub dist_max: Option<f64>,
    pub single_match: Option<bool>,
    pub n_group: Option<usize>,
}

impl SpatialSection {
    fn into_options(self) -> Option<SpatialOptions> {
        if self.enabled == Some(false) {
            return None;
        }
        let defaults = SpatialOptions::default();
        Some(SpatialOptions {
            n_keep: self.n_keep.unwrap_or(defaults.n_keep),
            dist_max: self.dist_max.unwrap_or(defaults.dist_max),
            single_match: self.single_match.unwrap_or(defaults.single_match),
            n_group: self.n_group.or(defaults.n_group),
        })
    }
}

/// Matching configuration as read from a TOML file.
///
/// ```toml
/// mode = "match"
///
/// [spatial]
/// n_keep = 2
/// dist_max = 25.0
///
/// [temporal]
/// by = { temp = "tmax" }
/// window = 3.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    pub mode: Option<String>,
    pub spatial: SpatialSection,
    pub temporal: Option<TemporalOptions>,
}

impl MatchConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| CubeError::Config {
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            CubeError::Config { message } => CubeError::Config {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }

    /// Validated options. Pairs are never read from the file, so a
    /// disabled spatial section is only checked once pairs are attached.
    pub fn into_options(self) -> Result<MatchOptions> {
        let mode = match &self.mode {
            Some(mode) => mode.parse::<MatchMode>()?,
            None => MatchMode::default(),
        };
        let spatial = self.spatial.into_options();
        if let Some(spatial) = &spatial {
            spatial.validate()?;
        }
        if let Some(temporal) = &self.temporal {
            temporal.validate()?;
        }
        Ok(MatchOptions {
            spatial,
            pairs: None,
            temporal: self.temporal,
            mode,
        })
    }
}
