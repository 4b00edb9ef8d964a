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

//! Log line assembly: the logger's front-end.
//!
//! One line per call: `(XX) <pid>.<tid>[.<id>] on
//! YYYY/MM/DD HH:MM:SS.uuuuuu in <function> at <file>:<line>: <message>\n`.
//! Process id and thread id are each resolved once and cached (pid
//! globally, tid per thread).

use std::time::{SystemTime, UNIX_EPOCH};

use super::Level;

impl Level {
    /// The `(XX)` tag used in the line format.
    pub(super) fn tag(self) -> &'static str {
        match self {
            Level::Always => "(**)",
            Level::Fatal => "(!!)",
            Level::Error => "(EE)",
            Level::Warn => "(WW)",
            Level::Info => "(II)",
            Level::Debug0 => "(DD)",
            Level::Debug1 => "(D1)",
            Level::Debug2 => "(D2)",
            Level::Debug3 => "(D3)",
            Level::Debug4 => "(D4)",
            Level::Debug5 => "(D5)",
            Level::Debug6 => "(D6)",
            Level::Debug7 => "(D7)",
            Level::Debug8 => "(D8)",
            Level::Debug9 => "(D9)",
        }
    }
}

/// Process id, resolved once per process.
pub(super) fn pid() -> u32 {
    std::process::id()
}

/// Thread id. On Linux this is the kernel's `gettid()` (via the stable
/// `SYS_gettid` syscall number); elsewhere (other unix targets lack a
/// portable equivalent without extra dependencies) a process-unique
/// counter is handed out per thread instead. Either way the value is
/// cached thread-locally after first use.
pub(super) fn tid() -> i64 {
    #[cfg(target_os = "linux")]
    {
        thread_local! {
            static TID: i64 = unsafe { libc::syscall(libc::SYS_gettid) };
        }
        TID.with(|t| *t)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::sync::atomic::{AtomicI64, Ordering};
        static NEXT: AtomicI64 = AtomicI64::new(1);
        thread_local! {
            static TID: i64 = NEXT.fetch_add(1, Ordering::Relaxed);
        }
        TID.with(|t| *t)
    }
}

/// Civil (proleptic Gregorian) date from a day count since the Unix epoch.
/// Howard Hinnant's `civil_from_days` algorithm (public domain); avoids
/// pulling in a calendar crate for one conversion.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365; // [0, 399]
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32; // [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32; // [1, 12]
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

pub(super) struct WallClock {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub micros: u32,
}

/// Decomposes `now` into UTC calendar fields. Local-time rendering is a
/// unix-only supplement (see [`localtime_now`]); UTC is the default and
/// the only option off unix.
pub(super) fn utc_now() -> WallClock {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs() as i64;
    let micros = since_epoch.subsec_micros();
    let days = secs.div_euclid(86_400);
    let secs_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    WallClock {
        year,
        month,
        day,
        hour: (secs_of_day / 3600) as u32,
        minute: ((secs_of_day % 3600) / 60) as u32,
        second: (secs_of_day % 60) as u32,
        micros,
    }
}

/// Local-time variant of [`utc_now`], via `libc::localtime_r` (unix only;
/// off unix `LogConfig::with_local_time` is accepted but has no effect,
/// see `mod.rs`'s `Logger::emit`).
#[cfg(unix)]
pub(super) fn localtime_now() -> WallClock {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let micros = since_epoch.subsec_micros();
    let secs = since_epoch.as_secs() as libc::time_t;
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    // SAFETY: `secs` and `tm` are both valid for the duration of the call.
    unsafe {
        libc::localtime_r(&secs, &mut tm);
    }
    WallClock {
        year: tm.tm_year as i64 + 1900,
        month: tm.tm_mon as u32 + 1,
        day: tm.tm_mday as u32,
        hour: tm.tm_hour as u32,
        minute: tm.tm_min as u32,
        second: tm.tm_sec as u32,
        micros,
    }
}

/// Assembles one complete log line (including the trailing `\n`), in the
/// bit-exact grammar:
/// `(XX) <pid>.<tid>[.<logger_id>] on YYYY/MM/DD HH:MM:SS.uuuuuu in
/// <function> at <file>:<line>: <message>\n`
pub(super) fn log_line(
    logger_id: Option<&str>,
    level: Level,
    file: &str,
    line: u32,
    function: &str,
    message: &str,
    clock: WallClock,
) -> Vec<u8> {
    use std::fmt::Write;

    let mut out = String::with_capacity(
        64 + file.len() + function.len() + message.len() + logger_id.map_or(0, |s| s.len()),
    );
    let _ = write!(out, "{} {}.{}", level.tag(), pid(), tid());
    if let Some(id) = logger_id {
        let _ = write!(out, ".{id}");
    }
    let _ = write!(
        out,
        " on {:04}/{:02}/{:02} {:02}:{:02}:{:02}.{:06} in {} at {}:{}: {}\n",
        clock.year,
        clock.month,
        clock.day,
        clock.hour,
        clock.minute,
        clock.second,
        clock.micros,
        function,
        file,
        line,
        message,
    );
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_from_days_epoch() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
    }

    #[test]
    fn civil_from_days_known_date() {
        // 2024-01-01 is 19723 days after the epoch.
        assert_eq!(civil_from_days(19723), (2024, 1, 1));
    }

    #[test]
    fn line_matches_grammar() {
        let clock = WallClock {
            year: 2026,
            month: 7,
            day: 28,
            hour: 1,
            minute: 2,
            second: 3,
            micros: 4,
        };
        let line = log_line(None, Level::Info, "foo.rs", 42, "bar", "hello", clock);
        let line = String::from_utf8(line).unwrap();
        assert!(line.starts_with("(II) "));
        assert!(line.contains(" on 2026/07/28 01:02:03.000004 "));
        assert!(line.contains(" in bar at foo.rs:42: hello"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn line_includes_logger_id_when_present() {
        let clock = utc_now();
        let line = log_line(Some("db1"), Level::Warn, "a.rs", 1, "f", "m", clock);
        let line = String::from_utf8(line).unwrap();
        let pid = pid();
        assert!(line.starts_with(&format!("(WW) {pid}.")));
        assert!(line.contains(".db1 on "));
    }
}
