//! Shared utilities for cube crates.

pub mod polars;

pub use polars::{
    any_to_value, format_decimal, value_to_any, values_to_column, values_to_series,
};
