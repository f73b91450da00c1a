//! Kernel console output and logging.
//!
//! The console device is owned by the boot code; it registers a
//! [`Console`] once and everything else prints through `kprint!` or the
//! `log` macros.

use core::fmt::{self, Write};

use log::{Level, Log, Metadata, Record, SetLoggerError};
use spin::Once;

/// A character sink.
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

static CONSOLE: Once<&'static dyn Console> = Once::new();

/// Install the console. Later calls are ignored.
pub fn register(console: &'static dyn Console) {
    CONSOLE.call_once(|| console);
}

struct Writer(&'static dyn Console);

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    if let Some(console) = CONSOLE.get() {
        let _ = Writer(*console).write_fmt(args);
    }
}

/// Print to the kernel console.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Print to the kernel console, with a newline.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

/// `log` backend writing `[LEVEL] target: message` lines to the console.
pub struct KernelLogger {
    level: Level,
}

impl KernelLogger {
    pub const fn new(level: Level) -> Self {
        KernelLogger { level }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::kprintln!("[{:5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: Once<KernelLogger> = Once::new();

/// Register `console` and route `log` records at `level` and above to it.
pub fn init_logger(console: &'static dyn Console, level: Level) -> Result<(), SetLoggerError> {
    register(console);
    let logger = LOGGER.call_once(|| KernelLogger::new(level));
    log::set_logger(logger)?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    struct Recorder(Mutex<String>);

    impl Console for Recorder {
        fn write_str(&self, s: &str) {
            self.0.lock().push_str(s);
        }
    }

    static RECORDER: Recorder = Recorder(Mutex::new(String::new()));

    #[test]
    fn logger_formats_level_and_target() {
        init_logger(&RECORDER, Level::Info).unwrap();
        log::info!(target: "fork", "1 forked 4");
        log::debug!(target: "sched", "hidden");
        crate::kprintln!("pid {}", 7);
        let out = RECORDER.0.lock().clone();
        assert!(out.contains("[INFO ] fork: 1 forked 4\n"));
        assert!(out.contains("pid 7\n"));
        assert!(!out.contains("hidden"));
    }
}
