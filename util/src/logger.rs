//! Logging setup for the onboard executable
//!
//! One fern dispatch feeding stdout and the session log file. Six named task
//! threads interleave in a single process log, so every line carries the
//! session clock and the name of the thread that produced it:
//!
//! ```text
//! [  12.345678  INFO cmd_logic] Rearm accepted, returning to manual mode
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::Level;
use thiserror::Error;

// Internal imports
use crate::session::{self, Session};

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with installing the logger.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Cannot open the session log file: {0}")]
    LogFile(#[from] std::io::Error),

    #[error("A logger is already installed: {0}")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Install the process-wide logger.
///
/// Must be called exactly once, after the session exists; every task thread
/// spawned afterwards logs through it.
pub fn init(min_level: LevelFilter, session: &Session) -> Result<(), InitError> {
    let log_file = fern::log_file(&session.log_file_path)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            let thread = std::thread::current();
            out.finish(format_args!(
                "[{:10.6} {} {}] {}",
                session::get_elapsed_seconds(),
                level_tag(record.level()),
                thread.name().unwrap_or("-"),
                message
            ))
        })
        .level(min_level)
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()?;

    log::info!(
        "Logging initialised, level {:?}, file {:?}",
        min_level,
        session.log_file_path
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Fixed-width coloured tag for a log level
fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Trace => "TRACE".dimmed().italic(),
        Level::Debug => "DEBUG".dimmed(),
        Level::Info => " INFO".normal(),
        Level::Warn => " WARN".yellow(),
        Level::Error => "ERROR".red().bold(),
    }
}
