//! Register-level interface to the DWM1000
//!
//! This module implements the bus transport used to address the DWM1000's
//! register set. Users of this crate should typically not need to use this
//! directly. Please consider using the [high-level interface] instead.
//!
//! Every transaction is framed by the chip-select line and starts with a
//! single header byte: bit 7 selects the transfer direction (set for write,
//! clear for read), bits 6..0 carry the register address. Payload bytes
//! follow MSB-first. The bus must be clocked in SPI mode 0 at no more than
//! [`MAX_CLOCK_HZ`]; configuring the SPI peripheral accordingly is the
//! responsibility of the board support code.
//!
//! **NOTE**: Field access methods accept types that can hold more bits than
//! the field actually consists of. Values too large for their field are
//! silently truncated.
//!
//! [high-level interface]: ../hl/index.html

use core::{fmt, marker::PhantomData};

use embedded_hal::{blocking::spi, digital::v2::OutputPin};

/// The maximum SPI clock rate the DWM1000 is rated for
///
/// The clock rate is a fixed configuration constant. It is not negotiated at
/// runtime; board support code must configure the SPI peripheral to stay at
/// or below this rate.
pub const MAX_CLOCK_HZ: u32 = 20_000_000;

/// Direction bit in the transaction header; set for write transactions
const HEADER_WRITE: u8 = 0x80;

/// Mask for the register address bits of the transaction header
const HEADER_ADDRESS: u8 = 0x7f;

/// Length of the transaction header, in bytes
const HEADER_LEN: usize = 1;

/// Entry point to the register-level API
///
/// Owns the SPI peripheral and chip-select pin connected to the DWM1000. The
/// transport cannot exist before those resources are initialized, so every
/// `Bus` value is ready for transactions by construction.
pub struct Bus<SPI, CS> {
    spi: SPI,
    chip_select: CS,
    chip_select_delay: u8,
}

impl<SPI, CS> Bus<SPI, CS> {
    /// Create a new instance of `Bus`
    ///
    /// Requires the SPI peripheral and the chip select pin that are connected
    /// to the DWM1000.
    pub fn new(spi: SPI, chip_select: CS) -> Self {
        Bus {
            spi,
            chip_select,
            chip_select_delay: 1,
        }
    }

    /// Set the chip select settling margin.
    ///
    /// This is the number of additional times the chip select pin is driven
    /// before data moves and before it is released again. The DWM1000
    /// requires a short settling window after select and before deselect;
    /// raise this on fast MCUs where a single pin write is shorter than that
    /// window. This is a timing contract of the peripheral, not a tunable.
    pub fn set_chip_select_delay(&mut self, delay: u8) {
        self.chip_select_delay = delay;
    }
}

impl<SPI, CS> Bus<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Write `data` to the register at `address`
    ///
    /// Frames the transaction as [address with write bit set][payload...],
    /// asserting chip select for the whole transaction. Fails with
    /// [`Error::EmptyTransfer`] before touching the bus if `data` is empty.
    pub fn write(&mut self, address: u8, data: &[u8]) -> Result<(), Error<SPI, CS>> {
        if data.is_empty() {
            return Err(Error::EmptyTransfer);
        }

        let header = [HEADER_WRITE | (address & HEADER_ADDRESS)];

        self.assert_cs_low()?;
        self.spi.write(&header).map_err(Error::Write)?;
        self.spi.write(data).map_err(Error::Write)?;
        self.assert_cs_low()?;
        self.assert_cs_high()?;

        Ok(())
    }

    /// Read `buffer.len()` bytes from the register at `address`
    ///
    /// Frames the transaction as [address with write bit clear], then clocks
    /// in one byte per buffer slot. A dummy byte is clocked out for every
    /// byte read, to drive the bus clock. Fails with [`Error::EmptyTransfer`]
    /// before touching the bus if `buffer` is empty.
    pub fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        if buffer.is_empty() {
            return Err(Error::EmptyTransfer);
        }

        let header = [address & HEADER_ADDRESS];

        self.assert_cs_low()?;
        self.spi.write(&header).map_err(Error::Write)?;
        for byte in buffer.iter_mut() {
            *byte = 0;
        }
        self.spi.transfer(buffer).map_err(Error::Transfer)?;
        self.assert_cs_low()?;
        self.assert_cs_high()?;

        Ok(())
    }

    /// Write a single byte to the register at `address`
    pub fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Error<SPI, CS>> {
        self.write(address, &[value])
    }

    /// Read a single byte from the register at `address`
    pub fn read_byte(&mut self, address: u8) -> Result<u8, Error<SPI, CS>> {
        let mut buffer = [0];
        self.read(address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Internal function for pulling the chip select low.
    ///
    /// Repeats the pin write to satisfy the select settling window.
    pub(crate) fn assert_cs_low(&mut self) -> Result<(), Error<SPI, CS>> {
        for _ in 0..=self.chip_select_delay {
            self.chip_select.set_low().map_err(Error::ChipSelect)?;
        }

        Ok(())
    }

    /// Internal function for pulling the chip select high.
    pub(crate) fn assert_cs_high(&mut self) -> Result<(), Error<SPI, CS>> {
        self.chip_select.set_high().map_err(Error::ChipSelect)?;

        Ok(())
    }
}

/// Provides access to a register
///
/// You can get an instance for a given register using one of the methods on
/// [`Bus`].
pub struct RegAccessor<'s, R, SPI, CS>(&'s mut Bus<SPI, CS>, PhantomData<R>);

impl<'s, R, SPI, CS> RegAccessor<'s, R, SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Read from the register
    pub fn read(&mut self) -> Result<R::Read, Error<SPI, CS>>
    where
        R: Register + Readable,
    {
        let mut r = R::read();
        let buffer = R::buffer(&mut r);
        buffer[0] = R::ID & HEADER_ADDRESS;

        self.0.assert_cs_low()?;
        self.0.spi.transfer(buffer).map_err(Error::Transfer)?;
        self.0.assert_cs_low()?;
        self.0.assert_cs_high()?;

        Ok(r)
    }

    /// Write to the register
    pub fn write<F>(&mut self, f: F) -> Result<(), Error<SPI, CS>>
    where
        R: Register + Writable,
        F: FnOnce(&mut R::Write) -> &mut R::Write,
    {
        let mut w = R::write();
        f(&mut w);

        let buffer = R::buffer(&mut w);
        buffer[0] = HEADER_WRITE | (R::ID & HEADER_ADDRESS);

        self.0.assert_cs_low()?;
        <SPI as spi::Write<u8>>::write(&mut self.0.spi, buffer).map_err(Error::Write)?;
        self.0.assert_cs_low()?;
        self.0.assert_cs_high()?;

        Ok(())
    }

    /// Modify the register
    pub fn modify<F>(&mut self, f: F) -> Result<(), Error<SPI, CS>>
    where
        R: Register + Readable + Writable,
        F: for<'r> FnOnce(&mut R::Read, &'r mut R::Write) -> &'r mut R::Write,
    {
        let mut r = self.read()?;
        let mut w = R::write();

        <R as Writable>::buffer(&mut w).copy_from_slice(<R as Readable>::buffer(&mut r));

        f(&mut r, &mut w);

        let buffer = <R as Writable>::buffer(&mut w);
        buffer[0] = HEADER_WRITE | (R::ID & HEADER_ADDRESS);

        self.0.assert_cs_low()?;
        <SPI as spi::Write<u8>>::write(&mut self.0.spi, buffer).map_err(Error::Write)?;
        self.0.assert_cs_low()?;
        self.0.assert_cs_high()?;

        Ok(())
    }
}

/// A bus error that can occur when communicating with the DWM1000
pub enum Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// SPI error occured during a transfer transaction
    Transfer(<SPI as spi::Transfer<u8>>::Error),

    /// SPI error occured during a write transaction
    Write(<SPI as spi::Write<u8>>::Error),

    /// Error occured while changing chip select signal
    ChipSelect(<CS as OutputPin>::Error),

    /// A transaction was attempted with a zero-length payload
    EmptyTransfer,
}

// We can't derive this implementation, as the compiler will complain that the
// associated error type doesn't implement `Debug`.
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
            Error::Transfer(error) => write!(f, "Transfer({:?})", error),
            Error::Write(error) => write!(f, "Write({:?})", error),
            Error::ChipSelect(error) => write!(f, "ChipSelect({:?})", error),
            Error::EmptyTransfer => write!(f, "EmptyTransfer"),
        }
    }
}

/// Implemented for all registers
///
/// This is a mostly internal trait that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
///
/// The DW1000 user manual, section 7.1, specifies what the values of the
/// constants should be for each register.
pub trait Register {
    /// The register address
    const ID: u8;

    /// The length of the register
    const LEN: usize;
}

/// Marker trait for registers that can be read from
///
/// This is a mostly internal trait that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
pub trait Readable {
    /// The type that is used to read from the register
    type Read;

    /// Return the read type for this register
    fn read() -> Self::Read;

    /// Return the read type's internal buffer
    fn buffer(r: &mut Self::Read) -> &mut [u8];
}

/// Marker trait for registers that can be written to
///
/// This is a mostly internal trait that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
pub trait Writable {
    /// The type that is used to write to the register
    type Write;

    /// Return the write type for this register
    fn write() -> Self::Write;

    /// Return the write type's internal buffer
    fn buffer(w: &mut Self::Write) -> &mut [u8];
}

/// Generates register implementations
macro_rules! impl_register {
    (
        $(
            $id:expr,
            $len:expr,
            $rw:tt,
            $name:ident($name_lower:ident) {
            #[$doc:meta]
            $(
                $field:ident,
                $first_bit:expr,
                $last_bit:expr,
                $ty:ty;
                #[$field_doc:meta]
            )*
            }
        )*
    ) => {
        $(
            #[$doc]
            #[allow(non_camel_case_types)]
            pub struct $name;

            impl Register for $name {
                const ID:  u8    = $id;
                const LEN: usize = $len;
            }

            #[$doc]
            pub mod $name_lower {
                use core::fmt;


                const HEADER_LEN: usize = super::HEADER_LEN;


                /// Used to read from the register
                pub struct R(pub(crate) [u8; HEADER_LEN + $len]);

                impl R {
                    $(
                        #[$field_doc]
                        pub fn $field(&self) -> $ty {
                            // Collect the field's bits, least significant
                            // first, into an intermediate wide enough for any
                            // field in the register map.
                            let mut value: u64 = 0;

                            let mut bit = $first_bit;
                            while bit <= $last_bit {
                                let byte = self.0[HEADER_LEN + bit / 8];
                                if byte >> (bit % 8) & 1 == 1 {
                                    value |= 1 << (bit - $first_bit);
                                }
                                bit += 1;
                            }

                            value as $ty
                        }
                    )*
                }

                impl fmt::Debug for R {
                    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                        write!(f, "0x")?;
                        for i in (0 .. $len).rev() {
                            write!(f, "{:02x}", self.0[HEADER_LEN + i])?;
                        }

                        Ok(())
                    }
                }


                /// Used to write to the register
                pub struct W(pub(crate) [u8; HEADER_LEN + $len]);

                impl W {
                    $(
                        #[$field_doc]
                        pub fn $field(&mut self, value: $ty) -> &mut Self {
                            let value = value as u64;

                            // Distribute the value's bits over the register
                            // data, least significant first. Bits the field
                            // can't hold are dropped.
                            let mut bit = $first_bit;
                            while bit <= $last_bit {
                                let mask = 1 << (bit % 8);
                                if value >> (bit - $first_bit) & 1 == 1 {
                                    self.0[HEADER_LEN + bit / 8] |= mask;
                                }
                                else {
                                    self.0[HEADER_LEN + bit / 8] &= !mask;
                                }
                                bit += 1;
                            }

                            self
                        }
                    )*
                }
            }

            impl_rw!($rw, $name, $name_lower, $len);
        )*


        impl<SPI, CS> Bus<SPI, CS> {
            $(
                #[$doc]
                pub fn $name_lower(&mut self) -> RegAccessor<$name, SPI, CS> {
                    RegAccessor(self, PhantomData)
                }
            )*
        }
    }
}

// Helper macro, used internally by `impl_register!`
macro_rules! impl_rw {
    (RO, $name:ident, $name_lower:ident, $len:expr) => {
        impl_rw!(@R, $name, $name_lower, $len);
    };
    (RW, $name:ident, $name_lower:ident, $len:expr) => {
        impl_rw!(@R, $name, $name_lower, $len);
        impl_rw!(@W, $name, $name_lower, $len);
    };

    (@R, $name:ident, $name_lower:ident, $len:expr) => {
        impl Readable for $name {
            type Read = $name_lower::R;

            fn read() -> Self::Read {
                $name_lower::R([0; HEADER_LEN + $len])
            }

            fn buffer(r: &mut Self::Read) -> &mut [u8] {
                &mut r.0
            }
        }
    };
    (@W, $name:ident, $name_lower:ident, $len:expr) => {
        impl Writable for $name {
            type Write = $name_lower::W;

            fn write() -> Self::Write {
                $name_lower::W([0; HEADER_LEN + $len])
            }

            fn buffer(w: &mut Self::Write) -> &mut [u8] {
                &mut w.0
            }
        }
    };
}

// All registers are implemented in this macro invocation. It follows the
// following syntax:
// <address>, <size-bytes>, <RO/RW>, <name-upper>(name-lower) { /// <doc>
//     <field 1>
//     <field 2>
//     ...
// }
//
// Each field follows the following syntax:
// <name>, <first-bit-index>, <last-bit-index>, <type>; /// <doc>
//
// Multi-byte fields are little-endian, matching the device.
impl_register! {
    0x00, 4, RO, DEV_ID(dev_id) { /// Device identifier
        value,   0, 31, u32; /// The whole identification word
        rev,     0,  3, u8;  /// Revision
        ver,     4,  7, u8;  /// Version
        model,   8, 15, u8;  /// Model
        ridtag, 16, 31, u16; /// Register Identification Tag
    }
    0x03, 4, RW, PANADR(panadr) { /// PAN Identifier and Short Address
        short_addr,  0, 15, u16; /// Short Address
        pan_id,     16, 31, u16; /// PAN Identifier
    }
    0x04, 4, RW, SYS_CFG(sys_cfg) { /// System Configuration
        ffen,      0,  0, u8; /// Frame Filtering Enable
        ffab,      1,  1, u8; /// Frame Filtering Allow Beacon
        ffad,      2,  2, u8; /// Frame Filtering Allow Data
        ffaa,      3,  3, u8; /// Frame Filtering Allow Acknowledgement
        ffam,      4,  4, u8; /// Frame Filtering Allow MAC Command Frame
        hirq_pol,  9,  9, u8; /// Host Interrupt Polarity
        dis_drxb, 12, 12, u8; /// Disable Double RX Buffer
        rxwtoe,   28, 28, u8; /// Receive Wait Timeout Enable
        rxautr,   29, 29, u8; /// Receiver Auto Re-enable
    }
    0x06, 5, RO, SYS_TIME(sys_time) { /// System Time Counter
        value, 0, 39, u64; /// System Time Counter
    }
    0x08, 5, RW, TX_FCTRL(tx_fctrl) { /// TX Frame Control
        tflen,    0,  6, u8;  /// TX Frame Length
        tfle,     7,  9, u8;  /// TX Frame Length Extension
        txbr,    13, 14, u8;  /// TX Bit Rate
        tr,      15, 15, u8;  /// TX Ranging Enable
        txprf,   16, 17, u8;  /// TX Pulse Repetition Frequency
        txpsr,   18, 19, u8;  /// TX Preamble Symbol Repetitions
        pe,      20, 21, u8;  /// Preamble Extension
        txboffs, 22, 31, u16; /// TX Buffer Index Offset
    }
    0x0A, 5, RW, DX_TIME(dx_time) { /// Delayed Send or Receive Time
        value, 0, 39, u64; /// Delayed Send or Receive Time
    }
    0x0D, 4, RW, SYS_CTRL(sys_ctrl) { /// System Control Register
        sfcst,     0, 0, u8; /// Suppress Auto-FCS Transmission
        txstrt,    1, 1, u8; /// Transmit Start
        txdlys,    2, 2, u8; /// Transmitter Delayed Sending
        trxoff,    6, 6, u8; /// Transceiver Off
        wait4resp, 7, 7, u8; /// Wait for Response
        rxenab,    8, 8, u8; /// Enable Receiver
        rxdlye,    9, 9, u8; /// Receiver Delayed Enable
    }
    0x0E, 4, RW, SYS_MASK(sys_mask) { /// System Event Mask Register
        mtxfrs,    7,  7, u8; /// Mask TX Frame Sent
        mldedone, 10, 10, u8; /// Mask LDE Processing Done
        mrxdfr,   13, 13, u8; /// Mask RX Data Frame Ready
        mrxfce,   15, 15, u8; /// Mask RX FCS Error
        mrxrfto,  17, 17, u8; /// Mask RX Frame Wait Timeout
        mrxpto,   21, 21, u8; /// Mask Preamble Detection Timeout
        mrxsfdto, 26, 26, u8; /// Mask RX SFD Timeout
    }
    0x0F, 5, RW, SYS_STATUS(sys_status) { /// System Event Status Register
        irqs,    0,  0, u8; /// Interrupt Request Status
        txfrs,   7,  7, u8; /// TX Frame Sent
        ldedone, 10, 10, u8; /// LDE Processing Done
        rxdfr,  13, 13, u8; /// RX Data Frame Ready
        rxfcg,  14, 14, u8; /// RX FCS Good
        rxfce,  15, 15, u8; /// RX FCS Error
        rxrfsl, 16, 16, u8; /// RX Reed Solomon Frame Sync Loss
        rxrfto, 17, 17, u8; /// RX Frame Wait Timeout
        rxovrr, 20, 20, u8; /// RX Overrun
        rxpto,  21, 21, u8; /// Preamble Detection Timeout
        rxsfdto, 26, 26, u8; /// RX SFD Timeout
        affrej, 29, 29, u8; /// Automatic Frame Filtering Rejection
    }
    0x10, 4, RO, RX_FINFO(rx_finfo) { /// RX Frame Information
        rxflen,  0,  6, u8;  /// Receive Frame Length
        rxpacc, 20, 31, u16; /// Preamble Accumulation Count
    }
    0x12, 8, RO, RX_FQUAL(rx_fqual) { /// RX Frame Quality Information
        std_noise,  0, 15, u16; /// Standard Deviation of Noise
        fp_ampl2,  16, 31, u16; /// First Path Amplitude point 2
        fp_ampl3,  32, 47, u16; /// First Path Amplitude point 3
        cir_pwr,   48, 63, u16; /// Channel Impulse Response Power
    }
    0x15, 14, RO, RX_TIME(rx_time) { /// Receive Time Stamp
        rx_stamp,  0, 39, u64; /// Fully adjusted time stamp
        fp_index, 40, 55, u16; /// First Path Index
        fp_ampl1, 56, 71, u16; /// First Path Amplitude point 1
    }
    0x17, 10, RO, TX_TIME(tx_time) { /// Transmit Time Stamp
        tx_stamp, 0, 39, u64; /// Fully adjusted time stamp
    }
    0x18, 2, RW, TX_ANTD(tx_antd) { /// TX Antenna Delay
        value, 0, 15, u16; /// TX Antenna Delay
    }
    0x1E, 4, RW, TX_POWER(tx_power) { /// TX Power Control
        boostnorm, 0,   7, u8; /// Normal Frame Gain
        boostp500, 8,  15, u8; /// 500 us Frame Gain Boost
        boostp250, 16, 23, u8; /// 250 us Frame Gain Boost
        boostp125, 24, 31, u8; /// 125 us Frame Gain Boost
    }
}

/// Number of payload bytes the transmit and receive data buffers hold
///
/// The hardware buffers are larger, but this driver only moves small ranging
/// payloads through them.
pub const BUFFER_LEN: usize = 32;

/// Transmit Data Buffer
#[allow(non_camel_case_types)]
pub struct TX_BUFFER;

impl Register for TX_BUFFER {
    const ID: u8 = 0x09;
    const LEN: usize = BUFFER_LEN;
}

impl Writable for TX_BUFFER {
    type Write = tx_buffer::W;

    fn write() -> Self::Write {
        tx_buffer::W([0; HEADER_LEN + BUFFER_LEN])
    }

    fn buffer(w: &mut Self::Write) -> &mut [u8] {
        &mut w.0
    }
}

/// Transmit Data Buffer
pub mod tx_buffer {
    use super::{BUFFER_LEN, HEADER_LEN};

    /// Used to write to the register
    pub struct W(pub(crate) [u8; HEADER_LEN + BUFFER_LEN]);

    impl W {
        /// Provides write access to the buffer contents
        pub fn data(&mut self) -> &mut [u8] {
            &mut self.0[HEADER_LEN..]
        }
    }
}

/// Receive Data Buffer
#[allow(non_camel_case_types)]
pub struct RX_BUFFER;

impl Register for RX_BUFFER {
    const ID: u8 = 0x11;
    const LEN: usize = BUFFER_LEN;
}

impl Readable for RX_BUFFER {
    type Read = rx_buffer::R;

    fn read() -> Self::Read {
        rx_buffer::R([0; HEADER_LEN + BUFFER_LEN])
    }

    fn buffer(r: &mut Self::Read) -> &mut [u8] {
        &mut r.0
    }
}

/// Receive Data Buffer
pub mod rx_buffer {
    use super::{BUFFER_LEN, HEADER_LEN};

    /// Used to read from the register
    pub struct R(pub(crate) [u8; HEADER_LEN + BUFFER_LEN]);

    impl R {
        /// Provides read access to the buffer contents
        pub fn data(&self) -> &[u8] {
            &self.0[HEADER_LEN..]
        }
    }
}

impl<SPI, CS> Bus<SPI, CS> {
    /// Transmit Data Buffer
    pub fn tx_buffer(&mut self) -> RegAccessor<TX_BUFFER, SPI, CS> {
        RegAccessor(self, PhantomData)
    }

    /// Receive Data Buffer
    pub fn rx_buffer(&mut self) -> RegAccessor<RX_BUFFER, SPI, CS> {
        RegAccessor(self, PhantomData)
    }
}
