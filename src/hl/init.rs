use embedded_hal::{
    blocking::{delay::DelayMs, spi},
    digital::v2::{InputPin, OutputPin},
};

use super::{DeviceStatus, Dwm1000, Error, EXPECTED_IDENTITY};
use crate::configs::IdentityPolicy;

impl<SPI, CS, RESET, IRQ> Dwm1000<SPI, CS, RESET, IRQ>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    IRQ: InputPin,
{
    /// Initialize the DWM1000
    ///
    /// Resets the device, verifies its identity according to the configured
    /// [`IdentityPolicy`], and brings it into a known quiet state: interrupt
    /// line active high, no events enabled, status [`DeviceStatus::Idle`].
    ///
    /// Calling this again on an already initialized driver repeats the
    /// sequence and is harmless.
    ///
    /// [`IdentityPolicy`]: ../configs/enum.IdentityPolicy.html
    pub fn initialize<D>(&mut self, delay: &mut D) -> Result<(), Error<SPI, CS>>
    where
        D: DelayMs<u8>,
    {
        self.reset(delay)?;

        let identity = self.read_device_identity()?;
        if identity == EXPECTED_IDENTITY {
            self.identity_verified = true;
        } else {
            self.identity_verified = false;
            if self.config.identity_policy == IdentityPolicy::Strict {
                return Err(Error::IdentityMismatch { found: identity });
            }
        }

        // Quiet the interrupt line until a ranging session arms it.
        self.ll.sys_cfg().modify(|_, w| w.hirq_pol(1))?;
        self.ll.sys_mask().write(|w| w)?;

        self.status = DeviceStatus::Idle;
        self.initialized = true;

        Ok(())
    }

    /// Reset the DWM1000 through its reset line
    ///
    /// Holds the line low for 10 ms, releases it, and gives the device
    /// another 10 ms to settle; both margins are required by the device.
    /// Does not change whether the driver counts as initialized.
    pub fn reset<D>(&mut self, delay: &mut D) -> Result<(), Error<SPI, CS>>
    where
        D: DelayMs<u8>,
    {
        self.reset.set_low().map_err(|_| Error::Gpio)?;
        delay.delay_ms(10);
        self.reset.set_high().map_err(|_| Error::Gpio)?;
        delay.delay_ms(10);

        Ok(())
    }

    /// Read the device's 32-bit identification word
    ///
    /// This is a query, not a fallible operation: it returns 0 when the
    /// driver is not initialized or the register can't be read. A healthy
    /// device reports [`EXPECTED_IDENTITY`].
    pub fn get_device_identity(&mut self) -> u32 {
        if !self.initialized {
            return 0;
        }

        self.read_device_identity().unwrap_or(0)
    }

    pub(super) fn read_device_identity(&mut self) -> Result<u32, Error<SPI, CS>> {
        Ok(self.ll.dev_id().read()?.value())
    }
}
