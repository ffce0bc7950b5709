//! Kernel logging facility
//!
//! Routes the `log` crate to COM1. Log levels are configured based on build
//! configuration (debug/release).

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::arch::without_interrupts;

/// Global logger instance available throughout the kernel
pub static LOGGER: Logger = Logger::new();

/// Serializes whole records so lines from different contexts never interleave
pub struct Logger {
    inner: Mutex<()>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub const fn new() -> Logger {
        Logger {
            inner: Mutex::new(()),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats messages as "[LEVEL] message"
    ///
    /// Interrupts stay off while the line is written, so a handler that logs
    /// cannot spin on a lock its own CPU already holds.
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            without_interrupts(|| {
                let _guard = self.inner.lock();
                crate::serial_println!("[{}] {}", record.level(), record.args());
            });
        }
    }

    fn flush(&self) {}
}

/// Maximum level for this build: `Debug` with debug assertions, `Info` otherwise.
pub const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Initializes the logging system
///
/// Must run before anything logs; records emitted earlier are dropped.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(default_level()))
        .expect("Logger initialization failed");
}
