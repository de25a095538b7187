use embedded_hal::{blocking::spi, digital::v2::OutputPin};

use super::{DeviceMode, DeviceStatus, Dwm1000, Error};

/// The highest transmit power level the device accepts
pub const MAX_TX_POWER_LEVEL: u8 = 31;

/// Fixed coarse DA gain; the 5-bit power level selects the fine mixer gain
const TX_POWER_COARSE: u8 = 0b010 << 5;

impl<SPI, CS, RESET, IRQ> Dwm1000<SPI, CS, RESET, IRQ>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Configure the device's role in the ranging link
    ///
    /// Programs the network addressing and the role-dependent receiver
    /// behavior: an anchor answers requests, so its receiver re-arms itself
    /// after every frame, while a tag enables the receiver once per
    /// exchange. Also sets up the frame control template used for this
    /// role's ranging transmissions.
    ///
    /// The mode is immutable while a ranging session is active; stop ranging
    /// first, then change the mode. Device registers are written before the
    /// cached mode changes, so a failed write leaves the previous
    /// configuration in effect.
    pub fn set_mode(&mut self, mode: DeviceMode) -> Result<(), Error<SPI, CS>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        match self.status {
            DeviceStatus::Transmitting | DeviceStatus::Receiving => {
                return Err(Error::RangingActive);
            }
            DeviceStatus::Idle | DeviceStatus::Error => {}
        }

        let pan_id = self.config.pan_id;
        let short_address = self.config.short_address;
        let txbr: u8 = self.config.bitrate.into();
        let txprf: u8 = self.config.pulse_repetition_frequency.into();
        let rxautr = (mode == DeviceMode::Anchor) as u8;

        self.ll
            .panadr()
            .write(|w| w.pan_id(pan_id).short_addr(short_address))?;

        self.ll.sys_cfg().modify(|_, w| {
            w.ffen(1) // filter out frames from other networks
                .ffab(1)
                .ffad(1)
                .ffaa(1)
                .rxautr(rxautr)
        })?;

        self.ll
            .tx_fctrl()
            .modify(|_, w| w.txbr(txbr).tr(1).txprf(txprf))?;

        self.mode = mode;

        Ok(())
    }

    /// Set the antenna delay calibration value
    ///
    /// The antenna delay removes the systematic ranging bias of the local RF
    /// path and must be calibrated per device. Written to the device
    /// register, then cached for the distance conversion; no status change.
    pub fn set_antenna_delay(&mut self, delay: u16) -> Result<(), Error<SPI, CS>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        self.ll.tx_antd().write(|w| w.value(delay))?;
        self.antenna_delay = delay;

        Ok(())
    }

    /// Set the transmit power level
    ///
    /// Levels run from 0 to [`MAX_TX_POWER_LEVEL`]; anything higher is
    /// clamped. The level is mirrored into each of the register's
    /// frame-duration gain slots, so boosted short frames transmit at the
    /// same power as normal ones.
    pub fn set_tx_power(&mut self, level: u8) -> Result<(), Error<SPI, CS>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        let level = level.min(MAX_TX_POWER_LEVEL);
        let gain = TX_POWER_COARSE | level;

        self.ll.tx_power().write(|w| {
            w.boostnorm(gain)
                .boostp500(gain)
                .boostp250(gain)
                .boostp125(gain)
        })?;
        self.tx_power = level;

        Ok(())
    }
}
