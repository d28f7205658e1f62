//! Internal kernel diagnostics log.
//!
//! Formatted log lines are kept in a small in-memory ring (for `drain`) and written
//! out to the 16550 serial console and the early boot log ring. Five severity levels
//! gate what gets formatted at all; a coarser [`LogFormat`] selects human-readable or
//! line-oriented JSON framing for whatever passes the gate.

use alloc::format;
use alloc::string::String;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> LogLevel {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(0); // 0 = Human, 1 = Json

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn is_enabled(level: LogLevel) -> bool {
    (level as u8) <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn set_format(format: LogFormat) {
    LOG_FORMAT.store(if format == LogFormat::Json { 1 } else { 0 }, Ordering::Relaxed);
}

pub fn get_format() -> LogFormat {
    if LOG_FORMAT.load(Ordering::Relaxed) == 1 { LogFormat::Json } else { LogFormat::Human }
}

/// Level presets matching how a deployment stage wants to run.
pub mod policy {
    use super::{set_level, LogLevel};

    pub const PRODUCTION_LEVEL: LogLevel = LogLevel::Warn;
    pub const DEVELOPMENT_LEVEL: LogLevel = LogLevel::Debug;
    pub const TESTING_LEVEL: LogLevel = LogLevel::Trace;

    pub fn set_production() {
        set_level(PRODUCTION_LEVEL);
    }

    pub fn set_development() {
        set_level(DEVELOPMENT_LEVEL);
    }

    pub fn set_testing() {
        set_level(TESTING_LEVEL);
    }
}

const LOG_BUFFER_CAPACITY: usize = 512;

struct LogEntry {
    uptime_ms: u64,
    level: LogLevel,
    module: &'static str,
    message: String,
}

/// Fixed-capacity ring of the most recent formatted entries, overwriting the
/// oldest when full. `None` slots are never observed outside of boot.
struct LogRing {
    slots: [Option<LogEntry>; LOG_BUFFER_CAPACITY],
    head: usize,
    tail: usize,
}

impl LogRing {
    const fn new() -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            slots: [NONE; LOG_BUFFER_CAPACITY],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        let next = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if next == self.tail {
            self.tail = (self.tail + 1) % LOG_BUFFER_CAPACITY;
        }
        self.slots[self.head] = Some(entry);
        self.head = next;
    }

    fn pop(&mut self) -> Option<LogEntry> {
        if self.head == self.tail {
            return None;
        }
        let entry = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % LOG_BUFFER_CAPACITY;
        entry
    }
}

static LOG_BUFFER: Mutex<LogRing> = Mutex::new(LogRing::new());

fn format_entry(entry: &LogEntry) -> String {
    match get_format() {
        LogFormat::Human => format!(
            "[{:>10}.{:03}] {:<5} {}: {}",
            entry.uptime_ms / 1000,
            entry.uptime_ms % 1000,
            entry.level.as_str(),
            entry.module,
            entry.message
        ),
        LogFormat::Json => format!(
            "{{\"uptime_ms\":{},\"level\":\"{}\",\"module\":\"{}\",\"message\":\"{}\"}}",
            entry.uptime_ms,
            entry.level.as_str(),
            entry.module,
            entry.message
        ),
    }
}

/// Formats and emits a message at `level`, tagged with `module`. Dropped if the
/// current level threshold excludes it. Pushed to the in-memory ring and written
/// out to the serial console and boot log.
pub fn log(level: LogLevel, module: &'static str, args: core::fmt::Arguments) {
    if !is_enabled(level) {
        return;
    }
    let entry = LogEntry {
        uptime_ms: crate::time_source::uptime_ms(),
        level,
        module,
        message: format!("{}", args),
    };
    let line = format_entry(&entry);
    LOG_BUFFER.lock().push(entry);
    crate::arch::x86_64::serial::serial_write(line.as_bytes());
    crate::arch::x86_64::serial::serial_write(b"\n");
    crate::lib::bootlog::write(line.as_bytes());
    crate::lib::bootlog::write(b"\n");
}

/// Drains up to `out.len()` formatted log lines into `out`, oldest first.
/// Returns the number of entries drained.
pub fn drain(out: &mut [String]) -> usize {
    let mut ring = LOG_BUFFER.lock();
    let mut n = 0;
    while n < out.len() {
        if let Some(entry) = ring.pop() {
            out[n] = format_entry(&entry);
            n += 1;
        } else {
            break;
        }
    }
    n
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Error, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Warn, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Info, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Debug, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Trace, module_path!(), format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_gating() {
        set_level(LogLevel::Warn);
        assert!(is_enabled(LogLevel::Error));
        assert!(is_enabled(LogLevel::Warn));
        assert!(!is_enabled(LogLevel::Info));
        assert!(!is_enabled(LogLevel::Trace));
    }

    #[test]
    fn policy_presets() {
        policy::set_testing();
        assert_eq!(get_level(), LogLevel::Trace);
        policy::set_production();
        assert_eq!(get_level(), LogLevel::Warn);
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let mut ring = LogRing::new();
        for i in 0..(LOG_BUFFER_CAPACITY + 4) {
            ring.push(LogEntry {
                uptime_ms: i as u64,
                level: LogLevel::Info,
                module: "test",
                message: alloc::string::String::from("x"),
            });
        }
        let first = ring.pop().unwrap();
        assert_eq!(first.uptime_ms, 4);
    }
}
