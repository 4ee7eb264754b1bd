//! Provides logging utilities, used by the host application.
//!
//! Library code logs through the [`log`] facade only, so any logger installed
//! by the host works. [`init_logger`] installs a terminal [`slog`] logger for
//! hosts that have none.

use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_scope::GlobalLoggerGuard;

/// Builds terminal [`Logger`] filtered by `RUST_LOG` environment variable.
///
/// [`Logger`] uses [`Async`] drain with channel size of 2048 entries.
#[must_use]
pub fn new_term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    Logger::root(drain, o!())
}

/// Initializes [`slog_stdlog`] and [`slog_scope`] global logger with a
/// [`new_term_logger`], so [`log`] records of this library end up in it.
///
/// Dropping the returned guard resets the global logger.
///
/// # Errors
///
/// If a [`log`] facade logger has been installed already.
pub fn init_logger() -> Result<GlobalLoggerGuard, log::SetLoggerError> {
    let scope_guard = slog_scope::set_global_logger(new_term_logger());
    slog_stdlog::init()?;
    Ok(scope_guard)
}
