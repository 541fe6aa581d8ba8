//! Source adapters for spatio-temporal cubes.
//!
//! This crate turns external tabular data into cube datasets and back:
//!
//! - **CSV Loading**: Read CSV files through polars, with date parsing
//! - **Frame Conversion**: Copy polars frames into cube tables and back
//! - **Nested Frames**: Read frames that already carry one row per site
//! - **Sources**: One entry point, [`load_nested`], for every input kind
//!
//! # Example
//!
//! ```ignore
//! use std::path::PathBuf;
//! use cube_ingest::{Source, load_nested};
//! use cube_model::{Coordinates, CubeSchema};
//!
//! let schema = CubeSchema::new("id", "date", Coordinates::default());
//! let nested = load_nested(Source::Csv(PathBuf::from("stations.csv")), &schema)?;
//! ```

mod csv;
mod error;
mod frame;
mod source;

// === Error Types ===
pub use error::{IngestError, Result};

// === CSV Reading ===
pub use csv::{read_csv_frame, read_csv_table, validate_encoding, write_csv};

// === Frame Conversion ===
pub use frame::{long_to_frames, nested_from_frame, table_from_frame, table_to_frame};

// === Sources ===
pub use source::{Source, load_nested};
