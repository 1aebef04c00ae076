use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use chrono::{Local, NaiveDate, TimeZone};
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "pbsq_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<u8> for LogLevel {
    fn from(val: u8) -> Self {
        match val {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

static DEFAULT_LOG_LEVEL: Mutex<LogLevel> = Mutex::new(LogLevel::Info);

pub fn set_log_level(level: LogLevel) {
    if let Ok(mut current) = DEFAULT_LOG_LEVEL.lock() {
        *current = level;
    }
}

/// `PBSQ_LOG_LEVEL` wins over the verbosity given on the command line.
pub fn set_log_level_from_env() {
    let Ok(level) = env::var("PBSQ_LOG_LEVEL") else {
        return;
    };
    let parsed = match level.to_ascii_lowercase().as_str() {
        "error" => LogLevel::Error,
        "warn" => LogLevel::Warn,
        "info" => LogLevel::Info,
        "debug" => LogLevel::Debug,
        "trace" => LogLevel::Trace,
        _ => return,
    };
    set_log_level(parsed);
}

fn current_log_level() -> LogLevel {
    DEFAULT_LOG_LEVEL
        .lock()
        .map(|level| *level)
        .unwrap_or(LogLevel::Info)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(current_log_level().as_filter()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Session logs are named `pbsq_<date>_<time>_<pid>.log`.
fn log_file_date(path: &Path, prefix: &str) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let date = name.strip_prefix(prefix)?.split('_').next()?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn rotate_logs(log_dir: &Path, prefix: &str, config: &LoggingConfig) -> Result<(), ConfigError> {
    fs::create_dir_all(log_dir)?;

    let mut logs: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".log"))
        })
        .collect();
    logs.sort();

    if config.max_files > 0 && logs.len() > config.max_files {
        let excess = logs.len() - config.max_files;
        for path in logs.drain(..excess) {
            let _ = fs::remove_file(path);
        }
    }

    if config.max_age_days == 0 {
        return Ok(());
    }

    let now = SystemTime::now();
    let max_age = Duration::from_secs(config.max_age_days * 24 * 60 * 60);
    for path in logs {
        let Some(date) = log_file_date(&path, prefix) else {
            continue;
        };
        let Some(midnight) = date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| Local.from_local_datetime(&dt).earliest())
        else {
            continue;
        };
        let too_old = now
            .duration_since(SystemTime::from(midnight))
            .is_ok_and(|age| age > max_age);
        if too_old {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

struct SessionFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for SessionFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(writer, "[")?;
        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, "] [{:5}] ", metadata.level())?;
        if let Some(module) = metadata.module_path() {
            write!(writer, "{}:{} ", module, metadata.line().unwrap_or(0))?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_file_subscriber(log_path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| ConfigError::PathIo {
            path: log_path.to_path_buf(),
            source: e,
        })?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .event_format(SessionFormatter);

    let tee = env::var("PBSQ_TEST_LOG_TEE").is_ok().then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .event_format(SessionFormatter)
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(tee)
        .try_init()
        .map_err(|e| ConfigError::General(format!("Logger already initialised: {}", e)))?;

    tracing::info!("--- pbsq session started (pid {}) ---", std::process::id());
    Ok(())
}

/// Logs to a fresh file under `$XDG_CACHE_HOME/pbsq/logs` and points
/// `$XDG_CACHE_HOME/pbsq/pbsq.log` at it.
pub fn init_session_logger(config: &LoggingConfig) -> Result<PathBuf, ConfigError> {
    let cache_home = xdg::BaseDirectories::with_prefix("pbsq")
        .get_cache_home()
        .ok_or(ConfigError::HomeDirectoryNotFound)?;
    let logs_dir = cache_home.join("logs");
    rotate_logs(&logs_dir, LOG_PREFIX, config)?;

    let filename = format!(
        "{}{}_{}.log",
        LOG_PREFIX,
        Local::now().format("%Y-%m-%d_%H-%M-%S"),
        std::process::id()
    );
    let log_path = logs_dir.join(&filename);
    init_file_subscriber(&log_path)?;

    let latest = cache_home.join("pbsq.log");
    let _ = fs::remove_file(&latest);
    #[cfg(unix)]
    {
        let _ = std::os::unix::fs::symlink(Path::new("logs").join(&filename), &latest);
    }
    Ok(log_path)
}

/// Plain stderr logging, used when no session file can be created.
pub fn init_stderr_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_timer(LocalTimeFormatter)
        .with_target(false)
        .try_init();
}

fn display_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().to_string()];
    parts.extend(command.get_args().map(|arg| {
        let s = arg.to_string_lossy();
        if s.is_empty() || s.contains(char::is_whitespace) {
            format!("'{}'", s)
        } else {
            s.to_string()
        }
    }));
    parts.join(" ")
}

pub fn log_and_print_command(command: &Command) {
    tracing::debug!("[CMD] {}", display_command(command));
}
