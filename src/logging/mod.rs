/*
 * Created on Tue Jul 28 2026
 *
 * This file is part of corestack, a foundational systems-toolbox library
 * providing mergeable priority queues, compressed tries, and adaptive
 * pooling/logging infrastructure for higher-level services.
 *
 * Copyright (c) 2026, The corestack developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Bounded concurrent asynchronous logging back-end.
//!
//! Split into a front-end that formats one complete line per call (level
//! tag, `pid.tid[.id]`, timestamp, function, `file:line`, message) and a
//! back-end that owns a dedicated writer thread draining a FIFO of
//! `(fd, buffer, length)` records via a bounded ring of outstanding
//! async writes. Also wired into the `log` facade (see [`LogFacade`]) so
//! ordinary `log::info!`/`log::warn!` call sites flow through the same
//! bounded writer as this crate's own `log_at!` family.

mod backend;
mod format;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use backend::{RawTarget, Writer};

/// Log levels, increasing in verbosity. `ALWAYS` is logged regardless of
/// the configured level; `DEBUG` is an alias for `DEBUG0`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Always = 0,
    Fatal,
    Error,
    Warn,
    Info,
    Debug0,
    Debug1,
    Debug2,
    Debug3,
    Debug4,
    Debug5,
    Debug6,
    Debug7,
    Debug8,
    Debug9,
}

/// Alias for [`Level::Debug0`] (`DEBUG` and `DEBUG0` name the same level).
pub const DEBUG: Level = Level::Debug0;

impl Level {
    fn from_log(level: log::Level) -> Level {
        match level {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug0,
            log::Level::Trace => Level::Debug0,
        }
    }

    fn to_log_filter(self) -> log::LevelFilter {
        match self {
            Level::Always | Level::Fatal | Level::Error => log::LevelFilter::Error,
            Level::Warn => log::LevelFilter::Warn,
            Level::Info => log::LevelFilter::Info,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Where log lines go. `/dev/stdout`/`/dev/stderr` are recognized by
/// string and map onto the standard streams (never closed on shutdown);
/// anything else is a regular file, opened for append on first use with
/// owner-rw/group-rw/other-r permissions.
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stdout,
    Stderr,
    Path(PathBuf),
}

impl<P: AsRef<Path>> From<P> for LogTarget {
    fn from(p: P) -> Self {
        match p.as_ref().to_str() {
            Some("/dev/stdout") => LogTarget::Stdout,
            Some("/dev/stderr") => LogTarget::Stderr,
            _ => LogTarget::Path(p.as_ref().to_path_buf()),
        }
    }
}

/// Validated logger configuration. Values are checked once here rather
/// than at every call site downstream.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub target: LogTarget,
    pub level: Level,
    pub logger_id: Option<String>,
    pub utc: bool,
    ring_capacity: usize,
}

impl LogConfig {
    /// The async-write ring's default capacity (`K`).
    pub const DEFAULT_RING_CAPACITY: usize = 64;

    pub fn new(target: impl Into<LogTarget>, level: Level) -> Self {
        LogConfig {
            target: target.into(),
            level,
            logger_id: None,
            utc: true,
            ring_capacity: Self::DEFAULT_RING_CAPACITY,
        }
    }

    /// Reads the level from the `CORESTACK_LOG` environment variable,
    /// falling back to `default` if the variable is unset or unparseable.
    pub fn from_env_or(target: impl Into<LogTarget>, default: Level) -> Self {
        let level = std::env::var("CORESTACK_LOG")
            .ok()
            .and_then(|v| parse_level(&v))
            .unwrap_or(default);
        Self::new(target, level)
    }

    pub fn with_logger_id(mut self, id: impl Into<String>) -> Self {
        self.logger_id = Some(id.into());
        self
    }

    pub fn with_local_time(mut self) -> Self {
        self.utc = false;
        self
    }

    /// Overrides the ring capacity downward only -- raising it would
    /// change the back-pressure contract. Intended for tests that want to
    /// exercise back-pressure with a tiny ring.
    pub fn with_ring_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > Self::DEFAULT_RING_CAPACITY {
            return Err(Error::with_detail(
                ErrorKind::Invariant,
                "ring capacity must be in 1..=64",
            ));
        }
        self.ring_capacity = capacity;
        Ok(self)
    }
}

fn parse_level(s: &str) -> Option<Level> {
    Some(match s.to_ascii_lowercase().as_str() {
        "always" => Level::Always,
        "fatal" => Level::Fatal,
        "error" => Level::Error,
        "warn" | "warning" => Level::Warn,
        "info" => Level::Info,
        "debug" | "debug0" => Level::Debug0,
        "debug1" => Level::Debug1,
        "debug2" => Level::Debug2,
        "debug3" => Level::Debug3,
        "debug4" => Level::Debug4,
        "debug5" => Level::Debug5,
        "debug6" => Level::Debug6,
        "debug7" => Level::Debug7,
        "debug8" => Level::Debug8,
        "debug9" => Level::Debug9,
        _ => return None,
    })
}

/// A running logger instance: the writer thread plus the resolved target
/// and configured level. Construct via [`init`]; there is at most one
/// live instance process-wide.
pub struct Logger {
    writer: Writer,
    target: RawTarget,
    level: Level,
    logger_id: Option<String>,
    utc: bool,
}

impl Logger {
    fn start(config: LogConfig) -> Result<Logger> {
        let target = open_target(&config.target)?;
        let writer = Writer::start(config.ring_capacity);
        Ok(Logger {
            writer,
            target,
            level: config.level,
            logger_id: config.logger_id,
            utc: config.utc,
        })
    }

    fn enabled(&self, level: Level) -> bool {
        self.level >= level
    }

    fn emit(&self, level: Level, file: &str, line: u32, function: &str, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let clock = if self.utc {
            format::utc_now()
        } else {
            #[cfg(unix)]
            {
                format::localtime_now()
            }
            #[cfg(not(unix))]
            {
                format::utc_now()
            }
        };
        let line_bytes = format::log_line(
            self.logger_id.as_deref(),
            level,
            file,
            line,
            function,
            message,
            clock,
        );
        self.writer.enqueue(self.target, line_bytes);
    }
}

#[cfg(unix)]
fn open_target(target: &LogTarget) -> Result<RawTarget> {
    use std::ffi::CString;

    match target {
        LogTarget::Stdout => Ok(RawTarget(libc::STDOUT_FILENO)),
        LogTarget::Stderr => Ok(RawTarget(libc::STDERR_FILENO)),
        LogTarget::Path(path) => {
            let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned().into_bytes())
                .map_err(|_| Error::with_detail(ErrorKind::Invariant, "log path contains a NUL byte"))?;
            // SAFETY: `c_path` is a valid, NUL-terminated C string for the
            // duration of the call. Permission bits are owner-rw/group-rw/other-r.
            let fd = unsafe {
                libc::open(
                    c_path.as_ptr(),
                    libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
                    (libc::S_IRUSR | libc::S_IWUSR | libc::S_IRGRP | libc::S_IWGRP | libc::S_IROTH) as libc::c_uint,
                )
            };
            if fd < 0 {
                return Err(Error::with_detail(ErrorKind::System, "failed to open log file"));
            }
            Ok(RawTarget(fd))
        }
    }
}

#[cfg(not(unix))]
fn open_target(target: &LogTarget) -> Result<RawTarget> {
    match target {
        LogTarget::Stdout => Ok(RawTarget(1)),
        LogTarget::Stderr => Ok(RawTarget(2)),
        LogTarget::Path(path) => backend::target::open(path)
            .map(RawTarget)
            .map_err(|_| Error::with_detail(ErrorKind::System, "failed to open log file")),
    }
}

static CURRENT: Mutex<Option<Logger>> = Mutex::new(None);

/// Starts the process-wide logger, initializing on first use. Fails with
/// `Invariant` if a logger is already running -- callers must
/// [`shutdown`] first.
pub fn init(config: LogConfig) -> Result<()> {
    let mut slot = CURRENT.lock();
    if slot.is_some() {
        return Err(Error::with_detail(
            ErrorKind::Invariant,
            "logger already initialized",
        ));
    }
    *slot = Some(Logger::start(config)?);
    Ok(())
}

/// Stops the process-wide logger: enqueues the poison record and joins
/// the writer thread, draining everything already queued first. A no-op
/// if no logger is running.
pub fn shutdown() {
    let logger = CURRENT.lock().take();
    if let Some(logger) = logger {
        logger.writer.shutdown();
    }
}

/// True iff a logger is currently running.
pub fn is_running() -> bool {
    CURRENT.lock().is_some()
}

/// Entry point used by the `log_at!`/level-specific macros below. Not
/// normally called directly.
#[doc(hidden)]
pub fn log(level: Level, file: &str, line: u32, function: &str, args: std::fmt::Arguments<'_>) {
    let slot = CURRENT.lock();
    if let Some(logger) = slot.as_ref() {
        if logger.enabled(level) {
            logger.emit(level, file, line, function, &args.to_string());
        }
    }
}

/// Recovers the current function's name without nightly's `#[track_caller]`
/// niceties: a common stable-Rust trick (monomorphize a local fn, read its
/// `type_name`, strip the trailing `::f`).
#[macro_export]
#[doc(hidden)]
macro_rules! __corestack_function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

macro_rules! level_macro {
    ($name:ident, $level:expr) => {
        #[macro_export]
        macro_rules! $name {
            ($($arg:tt)+) => {
                $crate::logging::log(
                    $level,
                    file!(),
                    line!(),
                    $crate::__corestack_function_name!(),
                    format_args!($($arg)+),
                )
            };
        }
    };
}

// One macro per level: always/fatal/error/warn/info/debug0..debug9.
level_macro!(log_always, $crate::logging::Level::Always);
level_macro!(log_fatal, $crate::logging::Level::Fatal);
level_macro!(log_error, $crate::logging::Level::Error);
level_macro!(log_warn, $crate::logging::Level::Warn);
level_macro!(log_info, $crate::logging::Level::Info);
level_macro!(log_debug, $crate::logging::Level::Debug0);
level_macro!(log_debug1, $crate::logging::Level::Debug1);
level_macro!(log_debug2, $crate::logging::Level::Debug2);
level_macro!(log_debug3, $crate::logging::Level::Debug3);
level_macro!(log_debug4, $crate::logging::Level::Debug4);
level_macro!(log_debug5, $crate::logging::Level::Debug5);
level_macro!(log_debug6, $crate::logging::Level::Debug6);
level_macro!(log_debug7, $crate::logging::Level::Debug7);
level_macro!(log_debug8, $crate::logging::Level::Debug8);
level_macro!(log_debug9, $crate::logging::Level::Debug9);

static LOG_FACADE_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Bridges the `log` facade onto this crate's writer, so ordinary
/// `log::info!`/`log::warn!` call sites anywhere in the process flow
/// through the same bounded async writer as `log_at!`. May only succeed
/// once per process (a `log` crate restriction, not this one);
/// subsequent calls return `Invariant`.
pub struct LogFacade;

impl log::Log for LogFacade {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        let slot = CURRENT.lock();
        match slot.as_ref() {
            Some(logger) => logger.enabled(Level::from_log(metadata.level())),
            None => false,
        }
    }

    fn log(&self, record: &log::Record) {
        let slot = CURRENT.lock();
        if let Some(logger) = slot.as_ref() {
            let level = Level::from_log(record.level());
            if logger.enabled(level) {
                let file = record.file().unwrap_or("<unknown>");
                let line = record.line().unwrap_or(0);
                let target = record.target();
                logger.emit(level, file, line, target, &record.args().to_string());
            }
        }
    }

    fn flush(&self) {}
}

/// Installs [`LogFacade`] as the process-wide `log` backend at the given
/// maximum filter level. Call after [`init`]; idempotent in the sense
/// that a second call is rejected rather than silently ignored, so
/// callers notice a double-install attempt.
pub fn install_log_facade(max_level: Level) -> Result<()> {
    if LOG_FACADE_INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(Error::with_detail(
            ErrorKind::Invariant,
            "log facade already installed",
        ));
    }
    log::set_max_level(max_level.to_log_filter());
    log::set_boxed_logger(Box::new(LogFacade))
        .map_err(|_| Error::with_detail(ErrorKind::Invariant, "a log backend is already installed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering as AtOrdering};
    use std::sync::Arc;
    use std::thread;

    fn unique_path(tag: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, AtOrdering::Relaxed);
        std::env::temp_dir().join(format!(
            "corestack-log-test-{tag}-{}-{}.log",
            std::process::id(),
            n
        ))
    }

    #[test]
    fn parse_level_roundtrip() {
        assert_eq!(parse_level("info"), Some(Level::Info));
        assert_eq!(parse_level("DEBUG3"), Some(Level::Debug3));
        assert_eq!(parse_level("nonsense"), None);
    }

    #[test]
    fn level_threshold_is_monotone() {
        assert!(!(Level::Info >= Level::Warn));
        assert!(Level::Debug2 >= Level::Info);
        assert!(Level::Always <= Level::Debug9);
    }

    #[test]
    fn init_twice_fails() {
        let path = unique_path("double-init");
        init(LogConfig::new(path.clone(), Level::Info)).unwrap();
        let err = init(LogConfig::new(path.clone(), Level::Info)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
        shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn shutdown_without_init_is_noop() {
        assert!(!is_running());
        shutdown();
    }

    #[test]
    fn roundtrip_many_threads_many_messages() {
        let path = unique_path("roundtrip");
        init(
            LogConfig::new(path.clone(), Level::Info)
                .with_ring_capacity(4)
                .unwrap(),
        )
        .unwrap();

        const THREADS: usize = 6;
        const MESSAGES: usize = 25;
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                thread::spawn(move || {
                    for m in 0..MESSAGES {
                        log_info!("thread {t} message {m}");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        shutdown();

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), THREADS * MESSAGES);
        for line in &lines {
            assert!(line.starts_with("(II) "));
            assert!(line.contains(" on "));
            assert!(line.contains(" at "));
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn below_threshold_messages_are_dropped() {
        let path = unique_path("threshold");
        init(LogConfig::new(path.clone(), Level::Warn)).unwrap();
        log_info!("should not appear");
        log_warn!("should appear");
        shutdown();

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("should appear"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn concurrent_producers_all_survive_ring_pressure() {
        let path = unique_path("ring-pressure");
        init(
            LogConfig::new(path.clone(), Level::Debug9)
                .with_ring_capacity(2)
                .unwrap(),
        )
        .unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    for i in 0..50 {
                        log_debug!("spin {i}");
                    }
                    done.fetch_add(1, AtOrdering::Relaxed);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(done.load(AtOrdering::Relaxed), 4);
        shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
