//! The cube descriptor carried alongside every dataset.

use serde::{Deserialize, Serialize};

/// Names of the longitude and latitude columns, in degrees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: String,
    pub latitude: String,
}

impl Coordinates {
    pub fn new(longitude: impl Into<String>, latitude: impl Into<String>) -> Self {
        Self {
            longitude: longitude.into(),
            latitude: latitude.into(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.longitude == column || self.latitude == column
    }

    pub fn names(&self) -> [&str; 2] {
        [&self.longitude, &self.latitude]
    }
}

impl Default for Coordinates {
    fn default() -> Self {
        Self::new("long", "lat")
    }
}

/// Which columns play the key, index and coordinate roles.
///
/// Immutable once built; transformations that change a role return a new
/// schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeSchema {
    key: String,
    index: String,
    coordinates: Coordinates,
}

impl CubeSchema {
    pub fn new(
        key: impl Into<String>,
        index: impl Into<String>,
        coordinates: Coordinates,
    ) -> Self {
        Self {
            key: key.into(),
            index: index.into(),
            coordinates,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    /// Same schema with a different key column.
    #[must_use]
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..self.clone()
        }
    }

    /// True for the key, index and coordinate columns.
    pub fn is_role_column(&self, column: &str) -> bool {
        column == self.key || column == self.index || self.coordinates.contains(column)
    }
}
