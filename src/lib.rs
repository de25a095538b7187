//! Driver for the Decawave DWM1000 UWB wireless transceiver module
//!
//! This crate drives the DWM1000 over its SPI register interface and
//! measures the distance between two radio nodes with single-sided two-way
//! ranging. One node acts as a stationary [`DeviceMode::Anchor`], the other
//! as a mobile [`DeviceMode::Tag`]; either side's [`Dwm1000::get_range`]
//! yields a [`RangingResult`] with distance, signal quality and signal
//! strength.
//!
//! The driver is generic over the `embedded-hal` traits, so it runs on any
//! MCU with an implementation of those, and against a simulated device in
//! tests. The [`hl`] module is the recommended interface; [`ll`] exposes the
//! raw register map for the cases it doesn't cover. Results and status
//! transitions are reported through the [`logging`] sink by the cooperative
//! [`monitor`] loop, which the firmware's main loop drives one tick at a
//! time.

#![no_std]
#![deny(missing_docs)]

pub mod configs;
pub mod hl;
pub mod ll;
pub mod logging;
pub mod monitor;
pub mod ranging;
pub mod time;

pub use crate::configs::{BitRate, Config, IdentityPolicy, PulseRepetitionFrequency};
pub use crate::hl::{DeviceMode, DeviceStatus, Dwm1000, Error, EXPECTED_IDENTITY};
pub use crate::logging::{LogLevel, Logger};
pub use crate::monitor::{Monitor, MonitorConfig};
pub use crate::ranging::RangingResult;
pub use crate::time::MonotonicClock;
