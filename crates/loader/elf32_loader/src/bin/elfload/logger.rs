//! Diagnostics on standard error.

use std::io::{self, Write as _};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let prog = crate::arg0();
        let mut stderr = io::stderr().lock();
        // Nowhere left to report a failed write.
        let _ = match record.level() {
            Level::Info => writeln!(stderr, "{prog}: {}", record.args()),
            level => writeln!(
                stderr,
                "{prog}: {}: {}",
                level.as_str().to_ascii_lowercase(),
                record.args()
            ),
        };
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

pub(crate) fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
