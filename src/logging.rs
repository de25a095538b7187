//! Leveled, key-value-annotated diagnostic output
//!
//! Ranging results and status transitions are only observable through this
//! channel, so the rendering is part of the driver's external contract: one
//! line per call, `[LEVEL] message | key: value | key: value`, with lines
//! below the configured minimum severity suppressed.
//!
//! The sink is anything that implements [`core::fmt::Write`] — a UART on
//! hardware, a string in tests.

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Severity of a diagnostic message
///
/// Numerically ordered from most to least severe; the discriminant doubles
/// as the wire encoding when a minimum severity is configured externally.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum LogLevel {
    /// A failure the system cannot recover from on its own
    Error = 0,
    /// A degraded condition that does not stop the system
    Warn = 1,
    /// Normal operational messages
    Info = 2,
    /// Detail useful when debugging
    Debug = 3,
    /// Measurement data
    Data = 4,
}

impl LogLevel {
    /// The level's name, as rendered in the output line
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Data => "DATA",
        }
    }
}

/// A leveled diagnostic logger writing to a [`core::fmt::Write`] sink
pub struct Logger<W> {
    sink: W,
    min_level: LogLevel,
}

impl<W> Logger<W>
where
    W: fmt::Write,
{
    /// Create a new logger
    ///
    /// Messages with a severity below `min_level` (numerically above it) are
    /// suppressed.
    pub fn new(sink: W, min_level: LogLevel) -> Self {
        Logger { sink, min_level }
    }

    /// Change the minimum severity
    pub fn set_level(&mut self, min_level: LogLevel) {
        self.min_level = min_level;
    }

    /// Write one diagnostic line
    ///
    /// `pairs` is an ordered sequence of key/value annotations of arbitrary
    /// length, rendered after the message in the order given. Values are
    /// taken as [`fmt::Arguments`] so call sites can format them in place:
    ///
    /// ```
    /// # use dwm1000_ranging::logging::{Logger, LogLevel};
    /// # let mut logger = Logger::new(String::new(), LogLevel::Data);
    /// logger.log(
    ///     LogLevel::Data,
    ///     "Range",
    ///     &[("Distance", format_args!("{:.2}m", 2.53))],
    /// );
    /// ```
    ///
    /// Diagnostics are best-effort: errors from the sink are swallowed, as
    /// there is nowhere left to report them.
    pub fn log(&mut self, level: LogLevel, message: &str, pairs: &[(&str, fmt::Arguments)]) {
        if level > self.min_level {
            return;
        }

        let _ = self.write_line(level, message, pairs);
    }

    /// Consume the logger, returning the sink
    pub fn free(self) -> W {
        self.sink
    }

    fn write_line(
        &mut self,
        level: LogLevel,
        message: &str,
        pairs: &[(&str, fmt::Arguments)],
    ) -> fmt::Result {
        write!(self.sink, "[{}] {}", level.name(), message)?;

        for (key, value) in pairs {
            write!(self.sink, " | {}: {}", key, value)?;
        }

        writeln!(self.sink)
    }
}
