//! CLI argument definitions for the cube tool.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, ColorChoice, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use cube_model::{Coordinates, CubeSchema};
use tracing::level_filters::LevelFilter;

use crate::logging::{LogConfig, LogFormat};

#[derive(Parser)]
#[command(
    name = "cube",
    version,
    about = "Spatio-temporal panel cubes - reshape and match station data",
    long_about = "Reshape panel data between nested and long form and match the sites\n\
                  of two panels by distance and by agreement of their peak values."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a CSV panel and show its sites and column roles.
    Inspect(InspectArgs),

    /// Convert a CSV panel to long form (observations plus sidecar).
    Long(LongArgs),

    /// Match the sites of two CSV panels.
    Match(MatchArgs),

    /// List the keys present in only one of two CSV panels.
    Unmatch(UnmatchArgs),
}

/// Column roles shared by every subcommand.
#[derive(Args, Clone)]
pub struct SchemaArgs {
    /// Site key column.
    #[arg(long = "key", default_value = "id")]
    pub key: String,

    /// Time index column.
    #[arg(long = "index", default_value = "date")]
    pub index: String,

    /// Longitude column, in degrees.
    #[arg(long = "lon", default_value = "long")]
    pub longitude: String,

    /// Latitude column, in degrees.
    #[arg(long = "lat", default_value = "lat")]
    pub latitude: String,
}

impl SchemaArgs {
    pub fn schema(&self) -> CubeSchema {
        CubeSchema::new(
            self.key.clone(),
            self.index.clone(),
            Coordinates::new(self.longitude.clone(), self.latitude.clone()),
        )
    }
}

#[derive(Parser)]
pub struct InspectArgs {
    /// Flat CSV file, one row per observation.
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    #[command(flatten)]
    pub schema: SchemaArgs,
}

#[derive(Parser)]
pub struct LongArgs {
    /// Flat CSV file, one row per observation.
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// Output directory (default: <CSV directory>/long).
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Group sites under this invariant column before writing.
    #[arg(long = "promote", value_name = "COLUMN")]
    pub promote: Option<String>,

    /// Copy these sidecar columns onto every observation row.
    #[arg(long = "unfold", value_name = "COLUMN", value_delimiter = ',')]
    pub unfold: Vec<String>,

    #[command(flatten)]
    pub schema: SchemaArgs,
}

#[derive(Parser)]
pub struct MatchArgs {
    /// Major panel (CSV).
    #[arg(value_name = "MAJOR")]
    pub major: PathBuf,

    /// Minor panel (CSV).
    #[arg(value_name = "MINOR")]
    pub minor: PathBuf,

    #[command(flatten)]
    pub schema: SchemaArgs,

    /// TOML file with `[spatial]` and `[temporal]` sections; flags override it.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use the pairs in this JSON file instead of spatial matching.
    #[arg(long = "pairs", value_name = "PATH")]
    pub pairs: Option<PathBuf>,

    /// Nearest minor sites kept per major site.
    #[arg(long = "n-keep")]
    pub n_keep: Option<usize>,

    /// Largest distance kept, in kilometres.
    #[arg(long = "dist-max")]
    pub dist_max: Option<f64>,

    /// Let each minor site keep only its nearest major site.
    #[arg(long = "single-match")]
    pub single_match: bool,

    /// Keep only this many groups, closest first.
    #[arg(long = "n-group")]
    pub n_group: Option<usize>,

    /// Run temporal matching with default options.
    #[arg(long = "temporal")]
    pub temporal: bool,

    /// Compare minor variable MINOR with major variable MAJOR.
    #[arg(long = "by", value_name = "MINOR=MAJOR", value_parser = parse_mapping)]
    pub by: Option<(String, String)>,

    /// Side whose peaks define the windows.
    #[arg(long = "independent", value_enum)]
    pub independent: Option<SideArg>,

    /// Peaks taken from each series.
    #[arg(long = "n-highest")]
    pub n_highest: Option<usize>,

    /// Full window width around each peak, in index units.
    #[arg(long = "window")]
    pub window: Option<f64>,

    /// Drop pairs with fewer matched peaks.
    #[arg(long = "min-match")]
    pub min_match: Option<usize>,

    /// Write the surviving pairs to this JSON file.
    #[arg(long = "json", value_name = "PATH")]
    pub json: Option<PathBuf>,

    /// Write the matched sites in long form to this directory.
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl MatchArgs {
    /// True when any temporal flag was given.
    pub fn wants_temporal(&self) -> bool {
        self.temporal
            || self.by.is_some()
            || self.independent.is_some()
            || self.n_highest.is_some()
            || self.window.is_some()
            || self.min_match.is_some()
    }
}

#[derive(Parser)]
pub struct UnmatchArgs {
    /// Major panel (CSV).
    #[arg(value_name = "MAJOR")]
    pub major: PathBuf,

    /// Minor panel (CSV).
    #[arg(value_name = "MINOR")]
    pub minor: PathBuf,

    #[command(flatten)]
    pub schema: SchemaArgs,
}

fn parse_mapping(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((minor, major)) if !minor.trim().is_empty() && !major.trim().is_empty() => {
            Ok((minor.trim().to_string(), major.trim().to_string()))
        }
        _ => Err(format!("expected MINOR=MAJOR, got '{value}'")),
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SideArg {
    Major,
    Minor,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Logging setup: `--log-level` beats `-v`/`-q`, and either beats `RUST_LOG`.
    pub fn log_config(&self) -> LogConfig {
        let level = self
            .log_level
            .map_or_else(|| self.verbosity.tracing_level_filter(), LevelFilter::from);
        let explicit = self.log_level.is_some() || self.verbosity.is_present();
        let ansi = match self.color.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stderr().is_terminal(),
        };
        LogConfig::new(level)
            .with_env_filter(!explicit)
            .with_format(self.log_format.into())
            .with_ansi(ansi)
            .with_file(self.log_file.clone())
    }
}
