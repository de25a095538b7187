//! Implementation of single-sided two-way ranging
//!
//! A range measurement is one exchange between the two ends of a link: the
//! tag transmits a [`RangingRequest`], the anchor replies with a
//! [`RangingReply`] that carries its receive-to-transmit turnaround time,
//! and the tag closes the exchange with a [`RangingReport`] so the anchor
//! side can emit a measurement too. Round-trip time minus the peer's
//! turnaround, divided by two, is the time of flight.
//!
//! This module defines the message payloads and the conversion from captured
//! timestamps to a [`RangingResult`]. The driver's high-level interface ties
//! the pieces together by moving the messages through the transmit and
//! receive buffers at the right time.
//!
//! Single-sided ranging is sensitive to clock offset between the two nodes;
//! keeping the turnaround short (the reply is scheduled a fixed, small delay
//! after the request arrives) keeps that error in the low centimeters.

use core::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::{
    configs::PulseRepetitionFrequency,
    time::{Duration, TICKS_PER_NANO},
};

/// Speed of light, in meters per second (equivalently, nanometers per
/// nanosecond)
pub const SPEED_OF_LIGHT: u64 = 299_792_458;

/// Implemented by all ranging messages
pub trait Message: Sized + for<'de> Deserialize<'de> + Serialize {
    /// A prelude that identifies the message
    const PRELUDE: Prelude;

    /// The length of the message's prelude
    ///
    /// This is a bit of a hack that we need until `slice::<impl [T]>::len`
    /// is stable as a const fn.
    const PRELUDE_LEN: usize;

    /// The length of the whole message, including prelude and data
    const LEN: usize = Self::PRELUDE_LEN + size_of::<Self>();

    /// Decodes a received payload as a message of this type
    ///
    /// Returns `Ok(None)` if the payload is not of the right type.
    fn decode(payload: &[u8]) -> Result<Option<Self>, ssmarshal::Error> {
        if !payload.starts_with(Self::PRELUDE.0) {
            // Not a message of this type
            return Ok(None);
        }

        let (message, _) = ssmarshal::deserialize::<Self>(&payload[Self::PRELUDE.0.len()..])?;

        Ok(Some(message))
    }

    /// Encodes this message into `buffer`, returning the number of bytes
    /// written
    ///
    /// The buffer must be able to hold the whole message; see [`Self::LEN`].
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, ssmarshal::Error> {
        assert!(buffer.len() >= Self::LEN);

        buffer[..Self::PRELUDE.0.len()].copy_from_slice(Self::PRELUDE.0);
        let len = ssmarshal::serialize(&mut buffer[Self::PRELUDE.0.len()..], self)?;

        Ok(Self::PRELUDE.0.len() + len)
    }
}

/// Sent before a message's data to identify the message
#[derive(Debug)]
pub struct Prelude(pub &'static [u8]);

/// Ranging request message
///
/// Sent by the tag to initiate a range measurement exchange.
#[derive(Debug, Deserialize, Serialize)]
#[repr(C)]
pub struct RangingRequest;

impl Message for RangingRequest {
    const PRELUDE: Prelude = Prelude(b"TWR REQUEST");
    const PRELUDE_LEN: usize = 11;
}

/// Ranging reply message
///
/// Sent by the anchor in response to a ranging request.
#[derive(Debug, Deserialize, Serialize)]
#[repr(C)]
pub struct RangingReply {
    /// The time between the request being received and this reply being
    /// sent, in the anchor's local time
    pub turnaround: Duration,
}

impl Message for RangingReply {
    const PRELUDE: Prelude = Prelude(b"TWR REPLY");
    const PRELUDE_LEN: usize = 9;
}

/// Ranging report message
///
/// Sent by the tag after it has converted the captured timestamps, so the
/// anchor side of the link can produce a measurement as well.
#[derive(Debug, Deserialize, Serialize)]
#[repr(C)]
pub struct RangingReport {
    /// The measured time of flight, in device time units
    pub time_of_flight: Duration,
}

impl Message for RangingReport {
    const PRELUDE: Prelude = Prelude(b"TWR REPORT");
    const PRELUDE_LEN: usize = 10;
}

/// The result of one range measurement
///
/// Owned by the caller that requested the measurement; the driver never
/// retains a result after returning it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangingResult {
    /// Measured distance to the peer, in meters
    pub distance_m: f32,

    /// Signal quality of the exchange, as a percentage
    pub quality: f32,

    /// Monotonic time the measurement was captured at, in milliseconds
    pub timestamp_ms: u32,

    /// Received signal strength of the exchange, in dBm
    pub rssi_dbm: i16,
}

/// Computes the time of flight from the captured exchange times
///
/// `round_trip` is the initiator's transmit-to-receive time, `turnaround`
/// the peer's reported receive-to-transmit delay. The calibrated antenna
/// delay is subtracted to remove the systematic bias of the local RF path;
/// the result saturates at zero rather than going negative on a
/// miscalibrated or noisy exchange.
pub fn time_of_flight(round_trip: Duration, turnaround: Duration, antenna_delay: u16) -> Duration {
    let tof = round_trip.value().saturating_sub(turnaround.value()) / 2;
    let tof = tof.saturating_sub(antenna_delay as u64);

    // Halving a 40-bit value keeps it within 40 bits, so this will never
    // panic.
    Duration::new(tof).unwrap()
}

/// Converts a time of flight into a distance, in millimeters
pub fn distance_mm(time_of_flight: Duration) -> u64 {
    // Nominally, all time units are based on a 64 GHz clock, meaning each
    // time unit is 1/64 ns. With the speed of light expressed in nm/ns, the
    // intermediate is distance in nanometers, times 64; widening to 128 bits
    // makes the multiplication overflow-free for any 40-bit time of flight.
    let distance_nm_times_64 = SPEED_OF_LIGHT as u128 * time_of_flight.value() as u128;

    (distance_nm_times_64 / TICKS_PER_NANO as u128 / 1_000_000) as u64
}

/// Estimates the received signal power, in dBm
///
/// Uses the channel impulse response power and preamble accumulation count
/// from the device's receive diagnostics, per the DW1000 user manual,
/// section 4.7.2. The estimate is quite accurate up to -85 dBm; above that
/// it underestimates the actual value.
///
/// Returns a non-finite value if the diagnostics are degenerate (e.g. a
/// preamble count of zero); callers must check.
pub fn rx_power_estimate(cir_pwr: u16, rxpacc: u16, prf: PulseRepetitionFrequency) -> f32 {
    #[allow(unused_imports)]
    use micromath::F32Ext;

    let a = prf_constant(prf);
    let n = rxpacc as f32;

    10.0 * ((cir_pwr as f32 * (1 << 17) as f32) / (n * n)).log10() - a
}

/// Estimates the first-path signal power, in dBm
///
/// Uses the three first-path amplitude points from the device's receive
/// diagnostics, per the DW1000 user manual, section 4.7.1.
pub fn first_path_power_estimate(
    fp_ampl1: u16,
    fp_ampl2: u16,
    fp_ampl3: u16,
    rxpacc: u16,
    prf: PulseRepetitionFrequency,
) -> f32 {
    #[allow(unused_imports)]
    use micromath::F32Ext;

    let a = prf_constant(prf);
    let n = rxpacc as f32;

    let f1 = fp_ampl1 as f32;
    let f2 = fp_ampl2 as f32;
    let f3 = fp_ampl3 as f32;

    10.0 * ((f1 * f1 + f2 * f2 + f3 * f3) / (n * n)).log10() - a
}

/// Derives a quality percentage from the receive power estimates
///
/// The difference between total received power and first-path power
/// indicates how much of the signal arrived over reflections: a gap under
/// 6 dB suggests a clean line-of-sight exchange, a gap over 16 dB a heavily
/// obstructed one. The percentage interpolates linearly in between.
pub fn quality_estimate(rx_power_dbm: f32, first_path_power_dbm: f32) -> f32 {
    const LOS_GAP_DB: f32 = 6.0;
    const NLOS_GAP_DB: f32 = 16.0;

    let gap = rx_power_dbm - first_path_power_dbm;

    if gap <= LOS_GAP_DB {
        100.0
    } else if gap >= NLOS_GAP_DB {
        0.0
    } else {
        100.0 * (NLOS_GAP_DB - gap) / (NLOS_GAP_DB - LOS_GAP_DB)
    }
}

fn prf_constant(prf: PulseRepetitionFrequency) -> f32 {
    match prf {
        PulseRepetitionFrequency::Mhz16 => 113.77,
        PulseRepetitionFrequency::Mhz64 => 121.74,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duration(value: u64) -> Duration {
        Duration::new(value).unwrap()
    }

    #[test]
    fn time_of_flight_halves_net_round_trip() {
        let tof = time_of_flight(duration(1000), duration(400), 0);
        assert_eq!(tof.value(), 300);
    }

    #[test]
    fn time_of_flight_subtracts_antenna_delay() {
        let tof = time_of_flight(duration(1000), duration(400), 50);
        assert_eq!(tof.value(), 250);
    }

    #[test]
    fn time_of_flight_saturates_at_zero() {
        let tof = time_of_flight(duration(300), duration(400), 0);
        assert_eq!(tof.value(), 0);

        let tof = time_of_flight(duration(1000), duration(400), 10_000);
        assert_eq!(tof.value(), 0);
    }

    #[test]
    fn distance_of_one_microsecond_flight() {
        // 64_000 time units are 1000 ns of flight, which light covers in
        // just under 300 m.
        assert_eq!(distance_mm(duration(64_000)), 299_792);
    }

    #[test]
    fn distance_of_zero_flight() {
        assert_eq!(distance_mm(duration(0)), 0);
    }

    #[test]
    fn distance_of_maximum_flight_does_not_overflow() {
        let max = distance_mm(duration(crate::time::TIME_MAX));
        assert!(max > 0);
    }

    #[test]
    fn rx_power_rough_correctness() {
        let power = rx_power_estimate(1000, 128, PulseRepetitionFrequency::Mhz16);

        assert!(power > -75.1);
        assert!(power < -74.3);
    }

    #[test]
    fn rx_power_degenerate_preamble_count_is_not_finite() {
        let power = rx_power_estimate(1000, 0, PulseRepetitionFrequency::Mhz16);
        assert!(!power.is_finite());
    }

    #[test]
    fn quality_bounds() {
        assert_eq!(quality_estimate(-80.0, -80.0), 100.0);
        assert_eq!(quality_estimate(-74.0, -80.0), 100.0);
        assert_eq!(quality_estimate(-64.0, -80.0), 0.0);
        assert_eq!(quality_estimate(-69.0, -80.0), 50.0);
    }

    #[test]
    fn quality_decreases_with_gap() {
        let close = quality_estimate(-73.0, -80.0);
        let far = quality_estimate(-68.0, -80.0);

        assert!(close > far);
    }

    #[test]
    fn reply_decodes_as_itself_only() {
        let reply = RangingReply {
            turnaround: duration(12_345),
        };

        let mut buffer = [0; 32];
        let len = reply.encode(&mut buffer).unwrap();
        assert_eq!(len, RangingReply::LEN);

        let decoded = RangingReply::decode(&buffer[..len]).unwrap().unwrap();
        assert_eq!(decoded.turnaround.value(), 12_345);

        assert!(RangingReport::decode(&buffer[..len]).unwrap().is_none());
    }
}
