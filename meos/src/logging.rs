//! Kernel logging.
//!
//! A thin [`log`] facade over the console sink. Subsystems log at their
//! boundaries (boot, fork, exec, exit, fault-kills) with the usual
//! `log::info!`/`debug!` macros; ports and the test harness pick the
//! level.

use log::{Level, LevelFilter, Log, Metadata, Record};

/// The kernel logger. One static instance, installed by [`init`].
pub struct Logger;

static LOGGER: Logger = Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let tag = match record.level() {
                Level::Error => "E",
                Level::Warn => "W",
                Level::Info => "I",
                Level::Debug => "D",
                Level::Trace => "T",
            };
            bedrock::println!("[{tag}] {}: {}", record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the kernel logger at the given level. Later calls are no-ops.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
