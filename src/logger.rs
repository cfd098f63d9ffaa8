//! Engine log: one plain-text file per session, opened by the host.
//!
//! Nothing is recorded until the host calls [`init`] or [`init_at`]; before
//! that `log_info!`, `log_warn!` and `log_err!` write nothing.  Opening
//! the log truncates it, so the file describes the current session only.
//!
//! [`init`] picks a per-user data directory:
//!   Windows:  `%APPDATA%\MockupFE\engine.log`
//!   Linux:    `$XDG_DATA_HOME/MockupFE/engine.log` (or `~/.local/share/...`)
//!   macOS:    `~/Library/Application Support/MockupFE/engine.log`

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

struct EngineLog {
    file: Mutex<File>,
    path: PathBuf,
}

static ENGINE_LOG: OnceLock<EngineLog> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Panic,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Panic => "panic",
        })
    }
}

/// Where the open log lives, if one was opened this session.
pub fn log_path() -> Option<&'static Path> {
    ENGINE_LOG.get().map(|log| log.path.as_path())
}

/// Append `line` verbatim.  Write failures are dropped.
pub fn write_line(line: &str) {
    let Some(log) = ENGINE_LOG.get() else { return };
    if let Ok(mut file) = log.file.lock() {
        let _ = writeln!(file, "{line}");
    }
}

/// Append one record tagged with the time of day and `level`.
pub fn write(level: Level, msg: &str) {
    if ENGINE_LOG.get().is_none() {
        return;
    }
    write_line(&format_record(unix_secs(), level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*));
    };
}

/// Open the engine log in the per-user data directory.
pub fn init() -> bool {
    init_at(&data_dir().join("MockupFE").join("engine.log"))
}

/// Open (and truncate) the engine log at `path`, then route panic messages
/// into it ahead of the previously installed hook.  The first successful
/// call wins; any later call returns `false` and leaves the log alone.
pub fn init_at(path: &Path) -> bool {
    if ENGINE_LOG.get().is_some() {
        return false;
    }
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("mockupfe: cannot open engine log {}: {e}", path.display());
            return false;
        }
    };
    let log = EngineLog { file: Mutex::new(file), path: path.to_path_buf() };
    if ENGINE_LOG.set(log).is_err() {
        return false;
    }

    write_line(&format!(
        "# mockupfe {} engine log, opened at unix time {}",
        env!("CARGO_PKG_VERSION"),
        unix_secs().unwrap_or(0)
    ));
    write_line(&format!("# {}", path.display()));

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format_record(unix_secs(), Level::Panic, &info.to_string()));
        previous(info);
    }));
    true
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local").join("share"),
        None => PathBuf::from("."),
    }
}

fn unix_secs() -> Option<u64> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// `HH:MM:SS level  message`, clock in UTC; `--:--:--` when the system
/// clock is before the epoch.
fn format_record(secs: Option<u64>, level: Level, msg: &str) -> String {
    let clock = match secs {
        Some(s) => format!("{:02}:{:02}:{:02}", (s % 86_400) / 3_600, (s % 3_600) / 60, s % 60),
        None => "--:--:--".to_string(),
    };
    format!("{clock} {level:<5} {msg}")
}
