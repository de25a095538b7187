//! High-level interface to the DWM1000
//!
//! The entry point to this API is the [`Dwm1000`] struct. Please refer to
//! the documentation there for more details.
//!
//! This module implements a high-level interface to the DWM1000. This is the
//! recommended way to access the device using this crate, unless you need
//! the greater flexibility provided by the [register-level interface].
//!
//! [register-level interface]: ../ll/index.html

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{configs::Config, ll};

pub use config::MAX_TX_POWER_LEVEL;
pub use error::*;

mod config;
mod error;
mod init;
mod ranging;

/// The identification word every DWM1000 reports
///
/// Read back from the device identity register during initialization and
/// checked against this constant according to the configured
/// [`IdentityPolicy`].
///
/// [`IdentityPolicy`]: ../configs/enum.IdentityPolicy.html
pub const EXPECTED_IDENTITY: u32 = 0xDECA0130;

/// The role a device plays in a ranging link
///
/// Set once after initialization, before ranging starts; the driver rejects
/// a mode change while a ranging session is active.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceMode {
    /// Stationary reference node; answers ranging requests
    Anchor = 0,
    /// Mobile node; initiates ranging
    Tag = 1,
}

/// The current status of the device
///
/// Only the driver mutates this; callers read it through
/// [`Dwm1000::get_device_status`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceStatus {
    /// No ranging session is active
    Idle,
    /// An exchange is being transmitted
    Transmitting,
    /// The receiver is armed or an exchange is being awaited
    Receiving,
    /// The last operation failed; stop and restart ranging to recover
    Error,
}

impl DeviceStatus {
    /// The status name, as rendered on the diagnostic channel
    pub fn name(&self) -> &'static str {
        match self {
            DeviceStatus::Idle => "IDLE",
            DeviceStatus::Transmitting => "TX",
            DeviceStatus::Receiving => "RX",
            DeviceStatus::Error => "ERROR",
        }
    }
}

/// Entry point to the DWM1000 driver API
///
/// One instance owns all device state: mode, status and calibration values
/// live here, not in globals, so several drivers can coexist in one process
/// (a simulated anchor/tag pair in a test, for example). The instance is
/// meant to be owned by a single caller; driver operations must not be
/// invoked reentrantly or from an interrupt context.
pub struct Dwm1000<SPI, CS, RESET, IRQ> {
    ll: ll::Bus<SPI, CS>,
    reset: RESET,
    irq: IRQ,
    config: Config,
    mode: DeviceMode,
    status: DeviceStatus,
    antenna_delay: u16,
    tx_power: u8,
    initialized: bool,
    identity_verified: bool,
}

impl<SPI, CS, RESET, IRQ> Dwm1000<SPI, CS, RESET, IRQ> {
    /// Create a new instance of `Dwm1000`
    ///
    /// Requires the SPI peripheral, the chip select pin, the reset pin and
    /// the interrupt input that are connected to the DWM1000. The instance
    /// starts out uninitialized; every operation other than
    /// [`initialize`] fails without touching the bus until initialization
    /// has succeeded.
    ///
    /// [`initialize`]: #method.initialize
    pub fn new(spi: SPI, chip_select: CS, reset: RESET, irq: IRQ, config: Config) -> Self {
        Dwm1000 {
            ll: ll::Bus::new(spi, chip_select),
            reset,
            irq,
            config,
            mode: DeviceMode::Tag,
            status: DeviceStatus::Idle,
            antenna_delay: 0,
            tx_power: 0,
            initialized: false,
            identity_verified: false,
        }
    }

    /// Provides direct access to the register-level API
    ///
    /// Be aware that by using the register-level API, you can invalidate
    /// various assumptions that the high-level API makes about the operation
    /// of the DWM1000. Don't use the register-level and high-level APIs in
    /// tandem, unless you know what you're doing.
    pub fn ll(&mut self) -> &mut ll::Bus<SPI, CS> {
        &mut self.ll
    }

    /// Returns the current device status
    pub fn get_device_status(&self) -> DeviceStatus {
        self.status
    }

    /// Returns the configured device mode
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Returns whether initialization has completed successfully
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns whether the device identity check passed
    ///
    /// Only meaningful after [`initialize`]. Under a lenient identity policy
    /// this is how callers learn about a mismatch, typically to surface a
    /// warning on their diagnostic channel.
    ///
    /// [`initialize`]: #method.initialize
    pub fn identity_verified(&self) -> bool {
        self.identity_verified
    }

    /// Returns the cached antenna delay calibration value
    pub fn antenna_delay(&self) -> u16 {
        self.antenna_delay
    }

    /// Returns the cached transmit power level
    pub fn tx_power(&self) -> u8 {
        self.tx_power
    }
}

// Can't be derived without putting requirements on the type parameters.
impl<SPI, CS, RESET, IRQ> fmt::Debug for Dwm1000<SPI, CS, RESET, IRQ> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Dwm1000 {{ mode: {:?}, status: {:?}, .. }}",
            self.mode, self.status,
        )
    }
}
