use core::fmt;

use embedded_hal::{blocking::spi, digital::v2::OutputPin};

use crate::ll;

/// An error that can occur when operating the DWM1000
pub enum Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Error occured while using the SPI bus
    Spi(ll::Error<SPI, CS>),

    /// The operation requires a successfully initialized driver
    NotInitialized,

    /// The device identity register did not read back the expected constant
    ///
    /// Only surfaced as an error under a strict identity policy; see
    /// [`IdentityPolicy`].
    ///
    /// [`IdentityPolicy`]: ../configs/enum.IdentityPolicy.html
    IdentityMismatch {
        /// The identification word the device actually reported
        found: u32,
    },

    /// A ranging exchange did not complete within the configured bound
    ExchangeTimeout,

    /// A measurement was requested while no ranging session was active
    RangingInactive,

    /// The operation is not allowed while a ranging session is active
    RangingActive,

    /// A received frame was damaged or not the expected ranging message
    InvalidFrame,

    /// An error occured while serializing or deserializing a ranging message
    Ssmarshal(ssmarshal::Error),

    /// The received signal strength was not calculable
    BadRssiCalculation,

    /// An error occured while driving the reset line or reading the
    /// interrupt line
    Gpio,
}

impl<SPI, CS> From<ll::Error<SPI, CS>> for Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    fn from(error: ll::Error<SPI, CS>) -> Self {
        Error::Spi(error)
    }
}

impl<SPI, CS> From<ssmarshal::Error> for Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    fn from(error: ssmarshal::Error) -> Self {
        Error::Ssmarshal(error)
    }
}

// We can't derive this implementation, as `Debug` is only implemented
// conditionally for `ll::Error`.
impl<SPI, CS> fmt::Debug for Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    <SPI as spi::Transfer<u8>>::Error: fmt::Debug,
    <SPI as spi::Write<u8>>::Error: fmt::Debug,
    CS: OutputPin,
    <CS as OutputPin>::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Spi(error) => write!(f, "Spi({:?})", error),
            Error::NotInitialized => write!(f, "NotInitialized"),
            Error::IdentityMismatch { found } => {
                write!(f, "IdentityMismatch {{ found: {:#010x} }}", found)
            }
            Error::ExchangeTimeout => write!(f, "ExchangeTimeout"),
            Error::RangingInactive => write!(f, "RangingInactive"),
            Error::RangingActive => write!(f, "RangingActive"),
            Error::InvalidFrame => write!(f, "InvalidFrame"),
            Error::Ssmarshal(error) => write!(f, "Ssmarshal({:?})", error),
            Error::BadRssiCalculation => write!(f, "BadRssiCalculation"),
            Error::Gpio => write!(f, "Gpio"),
        }
    }
}
