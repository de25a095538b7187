//! Cooperative measurement loop
//!
//! The [`Monitor`] is the top-level piece that periodically asks the driver
//! for a measurement and forwards results and status transitions to the
//! diagnostic channel. It owns no thread: the caller invokes [`Monitor::tick`]
//! from its main loop, and the poll interval is plain configuration, so a
//! test harness can drive the whole loop off a virtual clock.

use core::fmt;

use embedded_hal::{blocking::spi, digital::v2::OutputPin};

use crate::{
    hl::{DeviceStatus, Dwm1000},
    logging::{LogLevel, Logger},
    ranging::RangingResult,
    time::MonotonicClock,
};

/// Measurement loop configuration
pub struct MonitorConfig {
    /// Time between ranging measurements, in milliseconds
    pub ranging_interval_ms: u32,

    /// Quality percentage below which a result is flagged on the diagnostic
    /// channel
    pub quality_warn_threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            ranging_interval_ms: 200,
            quality_warn_threshold: 70.0,
        }
    }
}

/// Drives periodic range measurements and reports them
///
/// Single-threaded and non-preemptive: every piece of work happens inside
/// [`tick`], which never blocks longer than one bounded exchange.
///
/// [`tick`]: #method.tick
pub struct Monitor {
    config: MonitorConfig,
    last_ranging_ms: Option<u32>,
    last_status: DeviceStatus,
}

impl Monitor {
    /// Create a new measurement loop
    pub fn new(config: MonitorConfig) -> Self {
        Monitor {
            config,
            last_ranging_ms: None,
            last_status: DeviceStatus::Idle,
        }
    }

    /// Run one iteration of the measurement loop
    ///
    /// Performs at most one measurement per configured interval, logging the
    /// result at [`LogLevel::Data`], a low-quality warning where called for,
    /// and failures at [`LogLevel::Error`] with the device status. A status
    /// transition since the previous tick is reported at
    /// [`LogLevel::Debug`].
    ///
    /// Returns the measurement, if one was taken and succeeded, so callers
    /// can react beyond logging.
    pub fn tick<SPI, CS, RESET, IRQ, W, C>(
        &mut self,
        driver: &mut Dwm1000<SPI, CS, RESET, IRQ>,
        logger: &mut Logger<W>,
        clock: &mut C,
    ) -> Option<RangingResult>
    where
        SPI: spi::Transfer<u8> + spi::Write<u8>,
        CS: OutputPin,
        W: fmt::Write,
        C: MonotonicClock,
    {
        let now = clock.now_ms();
        let due = match self.last_ranging_ms {
            None => true,
            Some(last) => now.wrapping_sub(last) >= self.config.ranging_interval_ms,
        };

        let mut measurement = None;

        if due {
            self.last_ranging_ms = Some(now);

            match driver.get_range(clock) {
                Ok(result) => {
                    logger.log(
                        LogLevel::Data,
                        "Range",
                        &[
                            ("Distance", format_args!("{:.2}m", result.distance_m)),
                            ("Quality", format_args!("{:.0}%", result.quality)),
                            ("RSSI", format_args!("{}dBm", result.rssi_dbm)),
                            ("Time", format_args!("{}ms", result.timestamp_ms)),
                        ],
                    );

                    if result.quality < self.config.quality_warn_threshold {
                        logger.log(
                            LogLevel::Warn,
                            "Low signal quality",
                            &[("Quality", format_args!("{:.1}%", result.quality))],
                        );
                    }

                    measurement = Some(result);
                }
                Err(_) => {
                    logger.log(
                        LogLevel::Error,
                        "Ranging measurement failed!",
                        &[(
                            "Status",
                            format_args!("{}", driver.get_device_status().name()),
                        )],
                    );
                }
            }
        }

        let status = driver.get_device_status();
        if status != self.last_status {
            logger.log(
                LogLevel::Debug,
                "Status change",
                &[("Status", format_args!("{}", status.name()))],
            );
            self.last_status = status;
        }

        measurement
    }
}
