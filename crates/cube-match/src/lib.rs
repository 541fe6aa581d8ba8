//! Site matching between two cubes.
//!
//! The *major* dataset is matched against the *minor* dataset in stages:
//!
//! 1. **Spatial** ([`match_spatial`]): geodesic distances between every
//!    pair of sites, filtered by `n_keep`, `dist_max` and `single_match`.
//! 2. **Temporal** ([`match_temporal`]): the surviving pairs are scored by
//!    how many of their highest values line up in time.
//! 3. **Assembly** ([`match_sites`]): the surviving sites of both sides are
//!    combined into one nested dataset tagged with `group`, `role`,
//!    `distance` and `match_count`.
//!
//! Options can be built in code or loaded from TOML with [`MatchConfig`].

mod config;
mod geodesic;
mod options;
mod orchestrate;
mod spatial;
mod temporal;

pub use config::{MatchConfig, SpatialSection};
pub use geodesic::{great_circle_distance_km, vincenty_distance_km};
pub use options::{
    MatchMode, MatchOptions, MatchPair, Side, SpatialOptions, TemporalOptions,
};
pub use orchestrate::{
    DISTANCE_COLUMN, GROUP_COLUMN, MATCH_COUNT_COLUMN, MatchDiagnostics, MatchOutcome,
    MatchResult, ROLE_COLUMN, UnmatchReport, match_sites, unmatch,
};
pub use spatial::{DistanceMatrix, distance_matrix, match_spatial};
pub use temporal::match_temporal;
