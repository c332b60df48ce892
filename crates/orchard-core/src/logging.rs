//! Log setup for the `orchard` commands.
//!
//! Every process writes its own session file under
//! `$XDG_CACHE_HOME/orchard/logs/<name>_<date>_<time>_<pid>.log`, and
//! `$XDG_CACHE_HOME/orchard/<name>.log` links to the newest one. Old
//! session files are pruned by count and age on startup.

use crate::config::LoggingConfig;
use crate::constants::{dirs, env as env_vars};
use crate::errors::ConfigError;
use chrono::{Local, NaiveDateTime};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

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

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_level() -> LogLevel {
    LogLevel::from(LOG_LEVEL.load(Ordering::Relaxed))
}

/// `-v` raises the level to debug, `-vv` to trace.
pub fn set_log_level_from_verbosity(verbose: u8) {
    if verbose > 0 {
        set_log_level(LogLevel::from(
            (LogLevel::Info as u8).saturating_add(verbose),
        ));
    }
}

/// Reads `ORCHARD_LOG_LEVEL`; unknown values are ignored.
pub fn set_log_level_from_env() {
    if let Some(level) = std::env::var(env_vars::LOG_LEVEL)
        .ok()
        .and_then(|v| v.parse::<LogLevel>().ok())
    {
        set_log_level(level);
    }
}

struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// A session file name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionFile {
    path: PathBuf,
    started: NaiveDateTime,
}

impl SessionFile {
    fn file_name(name: &str, started: NaiveDateTime, pid: u32) -> String {
        format!("{}_{}_{}.log", name, started.format("%Y-%m-%d_%H-%M-%S"), pid)
    }

    fn parse(path: &Path, name: &str) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let rest = file_name
            .strip_prefix(name)?
            .strip_prefix('_')?
            .strip_suffix(".log")?;
        let (stamp, _pid) = rest.rsplit_once('_')?;
        let started = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H-%M-%S").ok()?;
        Some(Self {
            path: path.to_path_buf(),
            started,
        })
    }
}

/// Removes session files of `name` beyond `max_files` (oldest first) and
/// those older than `max_age_days`. Zero disables either limit. Returns the
/// number of files removed.
fn prune_sessions(
    log_dir: &Path,
    name: &str,
    config: &LoggingConfig,
    now: NaiveDateTime,
) -> Result<usize, ConfigError> {
    fs_err::create_dir_all(log_dir)?;

    let mut sessions: Vec<SessionFile> = fs_err::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| SessionFile::parse(&e.path(), name))
        .collect();
    sessions.sort_by(|a, b| b.started.cmp(&a.started));

    let max_age = chrono::Duration::days(config.max_age_days.min(100_000) as i64);
    let mut removed = 0;
    for (index, session) in sessions.iter().enumerate() {
        let too_many = config.max_files > 0 && index >= config.max_files;
        let too_old = config.max_age_days > 0 && now - session.started > max_age;
        if (too_many || too_old) && fs_err::remove_file(&session.path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn env_filter() -> EnvFilter {
    let level = Level::from(log_level()).to_string().to_lowercase();
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// `[time] LEVEL module:line message`
struct LineFormat;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for LineFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(writer, "[")?;
        LocalTime.format_time(&mut writer)?;
        write!(writer, "] {:5} ", metadata.level())?;
        if let Some(module) = metadata.module_path() {
            write!(writer, "{}:{} ", module, metadata.line().unwrap_or(0))?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Starts logging to a new session file and returns its path.
/// With `ORCHARD_TEST_LOG_TEE` set, events are copied to stderr as well.
pub fn init_session_logger(config: &LoggingConfig, name: &str) -> Result<PathBuf, ConfigError> {
    let cache_home = xdg::BaseDirectories::with_prefix(dirs::APP)
        .get_cache_home()
        .ok_or(ConfigError::DirectoryNotFound("cache"))?;
    let logs_dir = cache_home.join(dirs::LOGS);

    let now = Local::now().naive_local();
    let pruned = prune_sessions(&logs_dir, name, config, now)?;

    let file_name = SessionFile::file_name(name, now, std::process::id());
    let log_path = logs_dir.join(&file_name);
    let log_file = fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .event_format(LineFormat);
    let tee_layer = std::env::var_os(env_vars::LOG_TEE).map(|_| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .event_format(LineFormat)
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(tee_layer)
        .try_init()
        .map_err(|e| ConfigError::General(format!("logger already initialized: {}", e)))?;

    let link = cache_home.join(format!("{}.log", name));
    let _ = std::fs::remove_file(&link);
    #[cfg(unix)]
    {
        let _ = std::os::unix::fs::symlink(Path::new(dirs::LOGS).join(&file_name), &link);
    }

    tracing::info!(
        "Session started (pid {}, {} old log(s) pruned)",
        std::process::id(),
        pruned
    );
    Ok(log_path)
}

pub fn init_stderr_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_timer(LocalTime)
        .with_target(false)
        .try_init();
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,%+".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn display_command(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| quote_arg(&part.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Logs a spawned command at debug level. Environment values are never logged.
pub fn log_command(command: &Command) {
    tracing::debug!("[CMD] {}", display_command(command));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs::File;
    use tempfile::tempdir;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    #[test]
    fn test_session_file_names_round_trip() {
        let name = SessionFile::file_name("serve", at(2, 10), 4242);
        assert_eq!(name, "serve_2024-01-02_10-00-00_4242.log");
        let parsed = SessionFile::parse(Path::new(&name), "serve").unwrap();
        assert_eq!(parsed.started, at(2, 10));
        assert!(SessionFile::parse(Path::new(&name), "orchard").is_none());
        assert!(SessionFile::parse(Path::new("serve.log"), "serve").is_none());
    }

    #[test]
    fn test_prune_keeps_newest_sessions() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        let names: Vec<String> = (1..=4)
            .map(|day| SessionFile::file_name("serve", at(day, 10), 1))
            .collect();
        for name in &names {
            File::create(path.join(name)).unwrap();
        }
        File::create(path.join("orchard_2024-01-01_09-00-00_1.log")).unwrap();
        File::create(path.join("notes.txt")).unwrap();

        let config = LoggingConfig {
            max_files: 2,
            max_age_days: 0,
        };
        let removed = prune_sessions(path, "serve", &config, at(5, 0)).unwrap();

        assert_eq!(removed, 2);
        assert!(!path.join(&names[0]).exists());
        assert!(!path.join(&names[1]).exists());
        assert!(path.join(&names[2]).exists());
        assert!(path.join(&names[3]).exists());
        assert!(path.join("orchard_2024-01-01_09-00-00_1.log").exists());
        assert!(path.join("notes.txt").exists());
    }

    #[test]
    fn test_prune_by_age() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        let fresh = SessionFile::file_name("orchard", at(20, 8), 7);
        let stale = SessionFile::file_name("orchard", at(2, 8), 7);
        File::create(path.join(&fresh)).unwrap();
        File::create(path.join(&stale)).unwrap();

        let config = LoggingConfig {
            max_files: 0,
            max_age_days: 7,
        };
        prune_sessions(path, "orchard", &config, at(21, 0)).unwrap();

        assert!(path.join(&fresh).exists());
        assert!(!path.join(&stale).exists());
    }

    #[test]
    fn test_levels_parse_and_follow_verbosity() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("Warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::from(LogLevel::Info as u8 + 1), LogLevel::Debug);
        assert_eq!(LogLevel::from(LogLevel::Info as u8 + 5), LogLevel::Trace);
    }

    #[test]
    fn test_display_command_quotes_for_copy_paste() {
        let mut cmd = Command::new("ssh");
        cmd.arg("alice@login.hpc.example.org")
            .arg("-p")
            .arg("22")
            .arg("sh -c 'ls'");
        assert_eq!(
            display_command(&cmd),
            r"ssh alice@login.hpc.example.org -p 22 'sh -c '\''ls'\'''"
        );
    }
}
