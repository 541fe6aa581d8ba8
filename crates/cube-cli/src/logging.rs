//! Subscriber setup for the `cube` binary.
//!
//! Library crates only emit `tracing` events. The binary decides the level,
//! the format and the destination here.
//!
//! | level   | what shows up                                    |
//! |---------|--------------------------------------------------|
//! | `warn`  | dropped keys, sites left without a partner       |
//! | `info`  | `load`, `match_spatial`, `match_temporal` spans  |
//! | `debug` | row and pair counts after each step              |
//!
//! ```ignore
//! use cube_cli::logging::{init_logging, LogConfig, LogFormat};
//! use tracing::level_filters::LevelFilter;
//!
//! let config = LogConfig::new(LevelFilter::DEBUG).with_format(LogFormat::Json);
//! init_logging(&config)?;
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Crates raised to the configured level; everything else stays at `warn`.
const CUBE_CRATES: &[&str] = &[
    "cube_cli",
    "cube_common",
    "cube_ingest",
    "cube_match",
    "cube_model",
    "cube_transform",
];

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, span closes included.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level applied to [`CUBE_CRATES`].
    pub level: LevelFilter,
    /// Defer to `RUST_LOG` when it is set.
    pub use_env_filter: bool,
    pub timestamps: bool,
    pub ansi: bool,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LevelFilter::WARN)
    }
}

impl LogConfig {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            use_env_filter: true,
            timestamps: false,
            ansi: true,
            format: LogFormat::Pretty,
            file: None,
        }
    }

    #[must_use]
    pub fn with_env_filter(mut self, enable: bool) -> Self {
        self.use_env_filter = enable;
        self
    }

    #[must_use]
    pub fn with_timestamps(mut self, enable: bool) -> Self {
        self.timestamps = enable;
        self
    }

    #[must_use]
    pub fn with_ansi(mut self, enable: bool) -> Self {
        self.ansi = enable;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Log to `path`; ANSI colors are turned off for files.
    #[must_use]
    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.ansi = false;
        }
        self.file = path;
        self
    }

    /// Filter directives: the cube crates at the configured level, others at warn.
    pub fn directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        std::iter::once("warn".to_string())
            .chain(CUBE_CRATES.iter().map(|krate| format!("{krate}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let env = self
            .use_env_filter
            .then(|| EnvFilter::try_from_default_env().ok())
            .flatten();
        env.unwrap_or_else(|| EnvFilter::new(self.directives()))
    }

    fn layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer().with_writer(writer).with_target(false);
        match (self.format, self.timestamps) {
            (LogFormat::Json, _) => base.json().with_span_events(FmtSpan::CLOSE).boxed(),
            (LogFormat::Compact, true) => base.compact().with_ansi(self.ansi).boxed(),
            (LogFormat::Compact, false) => {
                base.compact().with_ansi(self.ansi).without_time().boxed()
            }
            (LogFormat::Pretty, true) => base.with_ansi(self.ansi).boxed(),
            (LogFormat::Pretty, false) => base.with_ansi(self.ansi).without_time().boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when the log file cannot be opened or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> io::Result<()> {
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_append(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };
    tracing_subscriber::registry()
        .with(config.layer(writer))
        .with(config.env_filter())
        .try_init()
        .map_err(io::Error::other)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_raise_only_cube_crates() {
        insta::assert_snapshot!(
            LogConfig::new(LevelFilter::DEBUG).directives(),
            @"warn,cube_cli=debug,cube_common=debug,cube_ingest=debug,cube_match=debug,cube_model=debug,cube_transform=debug"
        );
        assert!(
            LogConfig::new(LevelFilter::OFF)
                .directives()
                .ends_with("cube_transform=off")
        );
    }

    #[test]
    fn log_file_turns_off_colors() {
        let config = LogConfig::default()
            .with_format(LogFormat::Compact)
            .with_file(Some(PathBuf::from("cube.log")));
        assert!(!config.ansi);
        assert_eq!(config.level, LevelFilter::WARN);
        assert!(config.use_env_filter);
    }

    #[test]
    fn disabled_env_filter_uses_own_directives() {
        let config = LogConfig::new(LevelFilter::INFO).with_env_filter(false);
        assert_eq!(
            config.env_filter().to_string(),
            EnvFilter::new(config.directives()).to_string()
        );
    }
}
