//! Configuration structs for the DWM1000 driver
//!
//! This module houses the datastructures that control how the driver checks
//! the device on startup and how ranging exchanges are transmitted. The
//! config is passed to the driver on construction.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Driver configuration
pub struct Config {
    /// How a device identity mismatch during initialization is handled
    pub identity_policy: IdentityPolicy,

    /// The network identifier programmed into the device
    pub pan_id: u16,

    /// The short address programmed into the device
    pub short_address: u16,

    /// How long to wait for the peer during a ranging exchange, in
    /// milliseconds
    ///
    /// An exchange that hasn't completed within this bound is reported as a
    /// timeout rather than being waited on indefinitely.
    pub reply_timeout_ms: u32,

    /// Sets the bitrate of ranging transmissions
    pub bitrate: BitRate,

    /// Sets the PRF value of ranging transmissions
    pub pulse_repetition_frequency: PulseRepetitionFrequency,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            identity_policy: IdentityPolicy::Strict,
            pan_id: 0x0d57,
            short_address: 0x0001,
            reply_timeout_ms: 500,
            bitrate: Default::default(),
            pulse_repetition_frequency: Default::default(),
        }
    }
}

/// How the device identity check during initialization is enforced
///
/// The device identity register is expected to read back a fixed constant.
/// Historically this firmware family tolerated a mismatch silently; the
/// policy makes the choice explicit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IdentityPolicy {
    /// A mismatch fails initialization
    Strict,
    /// A mismatch is recorded but initialization proceeds
    ///
    /// The driver remembers the failed check; callers can inspect it and
    /// surface a warning through their diagnostic channel.
    Lenient,
}

/// The bitrate at which a message is transmitted
///
/// The discriminants are the TX_FCTRL register encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BitRate {
    /// 110 kilobits per second.
    /// This is an unofficial extension from decawave.
    Kbps110 = 0b00,
    /// 850 kilobits per second.
    Kbps850 = 0b01,
    /// 6.8 megabits per second.
    Kbps6800 = 0b10,
}

impl Default for BitRate {
    fn default() -> Self {
        BitRate::Kbps6800
    }
}

/// The PRF value
///
/// The discriminants are the TX_FCTRL register encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PulseRepetitionFrequency {
    /// 16 megahertz
    Mhz16 = 0b01,
    /// 64 megahertz
    Mhz64 = 0b10,
}

impl Default for PulseRepetitionFrequency {
    fn default() -> Self {
        PulseRepetitionFrequency::Mhz16
    }
}
