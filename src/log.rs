//! Global logger plumbing, so device/pool/filesystem code can emit structured log
//! records without threading a `Logger` through every constructor.

use std::{borrow::Borrow, ops::Deref};

use once_cell::sync::OnceCell;
use slog::{Drain, Logger as SlogLogger};
use slog_stdlog::StdLog;

static GLOBAL_LOGGER: OnceCell<Logger> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Logger {
    inner: SlogLogger,
}

impl Deref for Logger {
    type Target = SlogLogger;

    fn deref(&self) -> &Self::Target { self.inner.borrow() }
}

impl Logger {
    fn new(logger: SlogLogger) -> Self { Logger { inner: logger } }

    /// Get the global logger, initializing it to a `slog_stdlog` passthrough on
    /// first use if `setup` was never called.
    pub fn global() -> &'static Logger {
        GLOBAL_LOGGER.get_or_init(|| Logger::new(SlogLogger::root(StdLog.fuse(), o!())))
    }

    /// Install a root logger. Can only be called once; returns the rejected logger
    /// if the cell was already populated.
    pub fn setup(root_logger: SlogLogger) -> Result<(), Logger> {
        GLOBAL_LOGGER.set(Logger::new(root_logger))
    }
}
