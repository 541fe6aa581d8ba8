use std::path::PathBuf;

use cube_match::MatchPair;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct InspectResult {
    pub input: PathBuf,
    pub sites: usize,
    pub observations: usize,
    pub invariant: Vec<String>,
    pub variant: Vec<String>,
    pub ignored: Vec<String>,
}

#[derive(Debug)]
pub struct LongResult {
    pub observations: usize,
    pub sites: usize,
    pub observations_csv: PathBuf,
    pub sidecar_csv: PathBuf,
}

/// One pair as written to (and read from) JSON, keys in their text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    pub group: usize,
    pub major: String,
    pub minor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
}

impl From<&MatchPair> for PairRecord {
    fn from(pair: &MatchPair) -> Self {
        Self {
            group: pair.group,
            major: pair.major.to_string(),
            minor: pair.minor.to_string(),
            distance: pair.distance,
            match_count: pair.match_count,
        }
    }
}
