//! Library side of the `cube` command line tool.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod types;
