//! Transformations between the nested and long forms of a cube.
//!
//! - [`as_nested`] builds the nested form from a flat observation table.
//! - [`to_long`] / [`to_nested`] convert between the two forms without loss.
//! - [`promote`] and [`switch_key`] lift an invariant attribute to the key,
//!   on the long and the nested form respectively.
//! - [`unfold`] copies invariant attributes onto long-form rows.

mod classify;
mod convert;
mod promote;
mod rows;
mod unfold;

pub use classify::{Classification, detect_invariant};
pub use convert::{JoinPolicy, JoinReport, as_nested, to_long, to_nested, to_nested_with};
pub use promote::{promote, switch_key};
pub use unfold::unfold;
