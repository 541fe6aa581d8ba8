//! Data model for spatio-temporal panel cubes.
//!
//! A cube holds sites observed repeatedly over time in one of two views:
//!
//! - **Nested** ([`NestedDataset`]): one row per site, with the invariant
//!   attributes on the row and the observations in a nested `ts` table.
//! - **Long** ([`LongDataset`]): one row per observation, with the invariant
//!   attributes kept once per site in a [`SpatialSidecar`].
//!
//! Both views carry a [`CubeSchema`] naming the key, index and coordinate
//! columns. Conversions between the views live in `cube-transform`.

mod error;
mod long;
mod nested;
mod schema;
mod table;
mod value;

pub use error::{CubeError, Result};
pub use long::{LeafLevel, LongDataset, SpatialSidecar};
pub use nested::{LeafShape, NestedDataset, Payload, Site};
pub use schema::{Coordinates, CubeSchema};
pub use table::Table;
pub use value::Value;
