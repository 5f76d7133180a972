//! Routes the `log` facade to the VGA writer. Installed once from `_start`
//! before any other subsystem runs so early `log::info!`/`log::warn!` calls
//! from `fenwick_kernel` land on screen instead of being dropped.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::vga::println;

struct VgaLogger;

static LOGGER: VgaLogger = VgaLogger;

impl Log for VgaLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Must only be called once during boot.
pub fn init() {
    log::set_logger(&LOGGER).expect("logger already initialized");
    log::set_max_level(LevelFilter::Info);
}
