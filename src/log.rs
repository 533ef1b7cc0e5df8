use alloc::collections::VecDeque;
use core::fmt::{self, Write};
use spin::Mutex;

pub static LOG: Mutex<Option<Log>> = Mutex::new(None);

/// Size of the kernel log ring in bytes
pub const LOG_SIZE: usize = 1024 * 1024;

pub fn init() {
    *LOG.lock() = Some(Log::new(LOG_SIZE));
}

pub struct Log {
    data: VecDeque<u8>,
    size: usize,
}

impl Log {
    pub fn new(size: usize) -> Log {
        Log {
            data: VecDeque::with_capacity(size),
            size,
        }
    }

    pub fn read(&self) -> (&[u8], &[u8]) {
        self.data.as_slices()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write(&mut self, buf: &[u8]) {
        for &b in buf {
            while self.data.len() + 1 >= self.size {
                self.data.pop_front();
            }
            self.data.push_back(b);
        }
    }
}

impl Write for Log {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Log::write(self, s.as_bytes());
        Ok(())
    }
}

struct KernelLogger;

impl ::log::Log for KernelLogger {
    fn enabled(&self, metadata: &::log::Metadata<'_>) -> bool {
        metadata.level() <= ::log::max_level()
    }

    fn log(&self, record: &::log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Records emitted before init() are dropped.
        if let Some(log) = LOG.lock().as_mut() {
            let _ = writeln!(log, "[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Route the `log` facade into the kernel ring buffer.
pub fn init_logger(level: ::log::LevelFilter) {
    ::log::set_max_level(level);
    match ::log::set_logger(&LOGGER) {
        Ok(()) => ::log::info!("Logger initialized."),
        Err(e) => ::log::warn!("Logger setup failed! error: {}", e),
    }
}

pub use ::log::{debug, error, info, trace, warn};
