//! Process-wide log bootstrap for hosts embedding the projection engine.
//!
//! # Responsibility
//! - Start size-rotated file logging once per process.
//! - Capture panics as metadata-only log events.
//!
//! # Invariants
//! - Repeated init with the same level and directory is a no-op.
//! - Init with a different level or directory is rejected, never applied.
//! - Init never panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "rowsync";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 4 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: LevelFilter,
    log_dir: PathBuf,
    _handle: LoggerHandle,
}

/// Active logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingStatus {
    pub level: LevelFilter,
    pub log_dir: PathBuf,
}

/// Logging bootstrap errors.
#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    /// Directory is blank or relative.
    InvalidDirectory(String),
    CreateDirectory { path: PathBuf, source: std::io::Error },
    /// Logging already runs with a different level or directory.
    Conflict { active: LoggingStatus },
    Backend(flexi_logger::FlexiLoggerError),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected off|error|warn|info|debug|trace"
            ),
            Self::InvalidDirectory(dir) => {
                write!(f, "log directory must be a non-empty absolute path, got `{dir}`")
            }
            Self::CreateDirectory { path, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                path.display()
            ),
            Self::Conflict { active } => write!(
                f,
                "logging already active at `{}` with level `{}`",
                active.log_dir.display(),
                active.level
            ),
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDirectory { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<flexi_logger::FlexiLoggerError> for LoggingError {
    fn from(value: flexi_logger::FlexiLoggerError) -> Self {
        Self::Backend(value)
    }
}

/// Starts file logging under `log_dir` at `level`.
///
/// # Errors
/// - `UnsupportedLevel` / `InvalidDirectory` for bad arguments.
/// - `Conflict` when logging already runs with another configuration.
/// - `CreateDirectory` / `Backend` when the log sink cannot be opened.
pub fn init_logging(level: &str, log_dir: impl AsRef<Path>) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    let log_dir = validate_log_dir(log_dir.as_ref())?;

    let active = ACTIVE.get_or_try_init(|| start_logger(level, &log_dir))?;
    if active.level != level || active.log_dir != log_dir {
        return Err(LoggingError::Conflict {
            active: LoggingStatus {
                level: active.level,
                log_dir: active.log_dir.clone(),
            },
        });
    }
    Ok(())
}

/// Returns the active configuration, `None` before [`init_logging`].
pub fn logging_status() -> Option<LoggingStatus> {
    ACTIVE.get().map(|active| LoggingStatus {
        level: active.level,
        log_dir: active.log_dir.clone(),
    })
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(level: LevelFilter, log_dir: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level.to_string().to_ascii_lowercase())?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()?;

    install_panic_hook();
    info!(
        "event=logging_start module=logging status=ok level={level} version={} log_dir={}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );

    Ok(ActiveLogger {
        level,
        log_dir: log_dir.to_path_buf(),
        _handle: handle,
    })
}

fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    let normalized = match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    normalized
        .parse::<LevelFilter>()
        .map_err(|_| LoggingError::UnsupportedLevel(level.trim().to_string()))
}

fn validate_log_dir(log_dir: &Path) -> Result<PathBuf, LoggingError> {
    if log_dir.as_os_str().is_empty() || !log_dir.is_absolute() {
        return Err(LoggingError::InvalidDirectory(
            log_dir.display().to_string(),
        ));
    }
    Ok(log_dir.to_path_buf())
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic_captured module=logging status=error location={location} payload={}",
            single_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous(info);
    }));
}

/// Collapses line breaks and caps the length of a free-form log value.
pub(crate) fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut capped: String = flattened.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}
