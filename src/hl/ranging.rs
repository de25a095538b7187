use embedded_hal::{
    blocking::spi,
    digital::v2::{InputPin, OutputPin},
};

use super::{DeviceMode, DeviceStatus, Dwm1000, Error};
use crate::{
    ll,
    ranging::{self, Message, RangingReply, RangingReport, RangingRequest, RangingResult},
    time::{Duration, Instant, MonotonicClock},
};

/// How far in the future the anchor schedules its reply
///
/// 10 ms is enough to serialize the reply and start the transmitter even
/// with unoptimized code, while keeping the turnaround short enough that
/// clock drift between the two nodes stays negligible.
const REPLY_TX_DELAY_NANOS: u32 = 10_000_000;

/// When a transmission starts relative to the exchange
enum TxTiming {
    /// As fast as possible
    Immediate,
    /// At the instant previously written to the delayed-send register
    Delayed,
}

/// A frame collected from the receive buffer, with its capture time
struct ReceivedFrame {
    rx_time: Instant,
    len: usize,
    buffer: [u8; ll::BUFFER_LEN],
}

impl ReceivedFrame {
    fn payload(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

impl<SPI, CS, RESET, IRQ> Dwm1000<SPI, CS, RESET, IRQ>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Start a continuous ranging session
    ///
    /// Arms the interrupt events that signal exchange completion and, for an
    /// anchor, enables the receiver. The device status becomes
    /// [`DeviceStatus::Receiving`]; individual exchanges are then driven by
    /// [`get_range`].
    ///
    /// [`get_range`]: #method.get_range
    pub fn start_ranging(&mut self) -> Result<(), Error<SPI, CS>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        self.ll.sys_mask().write(|w| {
            w.mtxfrs(1)
                .mrxdfr(1)
                .mrxfce(1)
                .mrxrfto(1)
                .mrxpto(1)
                .mrxsfdto(1)
        })?;

        if self.mode == DeviceMode::Anchor {
            self.ll.sys_ctrl().write(|w| w.rxenab(1))?;
        }

        self.status = DeviceStatus::Receiving;

        Ok(())
    }

    /// Stop the ranging session
    ///
    /// Forces the transceiver off, disarms the interrupt events and returns
    /// the status to [`DeviceStatus::Idle`]. This is the only cancellation
    /// primitive; it takes effect between exchanges, not within one. Also
    /// the sanctioned way back from [`DeviceStatus::Error`].
    pub fn stop_ranging(&mut self) -> Result<(), Error<SPI, CS>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        self.force_idle()?;
        self.ll.sys_mask().write(|w| w)?;

        self.status = DeviceStatus::Idle;

        Ok(())
    }

    /// Perform one range measurement
    ///
    /// Requires an active ranging session (see [`start_ranging`]). Runs one
    /// complete exchange for the configured role — a tag initiates and
    /// computes the distance from its own timestamps, an anchor answers and
    /// takes the distance from the peer's closing report — and returns the
    /// converted result. The caller owns the result; the driver keeps
    /// nothing.
    ///
    /// The whole exchange is bounded by the configured reply timeout,
    /// measured against the supplied clock, which also stamps the result.
    /// On failure the status becomes [`DeviceStatus::Error`] and no result
    /// is produced; stop and restart ranging before the next attempt. The
    /// device mode is never modified.
    ///
    /// [`start_ranging`]: #method.start_ranging
    pub fn get_range<C>(&mut self, clock: &mut C) -> Result<RangingResult, Error<SPI, CS>>
    where
        C: MonotonicClock,
    {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if self.status != DeviceStatus::Receiving {
            return Err(Error::RangingInactive);
        }

        let outcome = match self.mode {
            DeviceMode::Tag => self.initiate_exchange(clock),
            DeviceMode::Anchor => self.answer_exchange(clock),
        };

        match outcome {
            Ok(result) => {
                self.status = DeviceStatus::Receiving;
                Ok(result)
            }
            Err(error) => {
                self.status = DeviceStatus::Error;
                Err(error)
            }
        }
    }

    /// The initiator's half of an exchange: request, reply, report
    fn initiate_exchange<C>(&mut self, clock: &mut C) -> Result<RangingResult, Error<SPI, CS>>
    where
        C: MonotonicClock,
    {
        let started = clock.now_ms();

        self.status = DeviceStatus::Transmitting;

        self.transmit(&RangingRequest, TxTiming::Immediate, true)?;
        self.wait_for_tx(clock, started)?;

        let reply = self.wait_for_frame(clock, started)?;
        let reply_payload: RangingReply = decode_expected(reply.payload())?;

        let tx_stamp = self.read_tx_stamp()?;
        let round_trip = reply.rx_time.duration_since(tx_stamp);

        let time_of_flight =
            ranging::time_of_flight(round_trip, reply_payload.turnaround, self.antenna_delay);
        let distance_m = ranging::distance_mm(time_of_flight) as f32 / 1000.0;

        // Close the exchange, so the peer can produce a measurement too.
        self.transmit(&RangingReport { time_of_flight }, TxTiming::Immediate, false)?;
        self.wait_for_tx(clock, started)?;

        let (rssi_dbm, quality) = self.read_signal_diagnostics()?;

        Ok(RangingResult {
            distance_m,
            quality,
            timestamp_ms: clock.now_ms(),
            rssi_dbm,
        })
    }

    /// The responder's half of an exchange: await request, reply, await
    /// report
    fn answer_exchange<C>(&mut self, clock: &mut C) -> Result<RangingResult, Error<SPI, CS>>
    where
        C: MonotonicClock,
    {
        let started = clock.now_ms();

        let request = self.wait_for_frame(clock, started)?;
        let _: RangingRequest = decode_expected(request.payload())?;

        self.status = DeviceStatus::Transmitting;

        // Schedule the reply at a fixed instant, so the turnaround reported
        // to the peer is exact instead of measured after the fact.
        let now = self.ll.sys_time().read()?.value();

        // The system time register is a 40-bit field, so this will not
        // panic.
        let now = Instant::new(now).unwrap();

        let tx_time = now + Duration::from_nanos(REPLY_TX_DELAY_NANOS);
        let turnaround = tx_time.duration_since(request.rx_time);

        self.ll.dx_time().write(|w| w.value(tx_time.value()))?;
        self.transmit(&RangingReply { turnaround }, TxTiming::Delayed, true)?;
        self.wait_for_tx(clock, started)?;

        let report = self.wait_for_frame(clock, started)?;
        let report_payload: RangingReport = decode_expected(report.payload())?;

        let distance_m = ranging::distance_mm(report_payload.time_of_flight) as f32 / 1000.0;

        let (rssi_dbm, quality) = self.read_signal_diagnostics()?;

        Ok(RangingResult {
            distance_m,
            quality,
            timestamp_ms: clock.now_ms(),
            rssi_dbm,
        })
    }

    /// Load a message into the transmit buffer and start the transmitter
    fn transmit<M>(
        &mut self,
        message: &M,
        timing: TxTiming,
        wait_for_response: bool,
    ) -> Result<(), Error<SPI, CS>>
    where
        M: Message,
    {
        let mut frame = [0; ll::BUFFER_LEN];
        let len = message.encode(&mut frame)?;

        self.ll.tx_buffer().write(|w| {
            w.data()[..len].copy_from_slice(&frame[..len]);
            w
        })?;

        // Frame length includes the two-octet CRC appended in hardware.
        self.ll
            .tx_fctrl()
            .modify(|_, w| w.tflen(len as u8 + 2).txboffs(0))?;

        self.ll.sys_ctrl().write(|w| {
            let w = w.txstrt(1).wait4resp(wait_for_response as u8);
            match timing {
                TxTiming::Immediate => w,
                TxTiming::Delayed => w.txdlys(1),
            }
        })?;

        Ok(())
    }

    /// Wait for the running transmission to finish
    fn wait_for_tx<C>(&mut self, clock: &mut C, started: u32) -> Result<(), Error<SPI, CS>>
    where
        C: MonotonicClock,
    {
        loop {
            let sys_status = self.ll.sys_status().read()?;
            if sys_status.txfrs() == 0b1 {
                // Clear the latched event for the next cycle.
                self.ll.sys_status().write(|w| w.txfrs(1))?;
                return Ok(());
            }

            if clock.elapsed_ms(started) > self.config.reply_timeout_ms {
                return Err(Error::ExchangeTimeout);
            }
        }
    }

    /// Wait for a frame, within the exchange's time budget
    fn wait_for_frame<C>(
        &mut self,
        clock: &mut C,
        started: u32,
    ) -> Result<ReceivedFrame, Error<SPI, CS>>
    where
        C: MonotonicClock,
    {
        loop {
            match self.poll_frame() {
                Ok(frame) => return Ok(frame),
                Err(nb::Error::WouldBlock) => {
                    if clock.elapsed_ms(started) > self.config.reply_timeout_ms {
                        return Err(Error::ExchangeTimeout);
                    }
                }
                Err(nb::Error::Other(error)) => return Err(error),
            }
        }
    }

    /// Single, non-blocking check for a completed receive operation
    fn poll_frame(&mut self) -> nb::Result<ReceivedFrame, Error<SPI, CS>> {
        let sys_status = self
            .ll
            .sys_status()
            .read()
            .map_err(|error| nb::Error::Other(Error::Spi(error)))?;

        // Is a frame ready?
        if sys_status.rxdfr() == 0b0 {
            // No frame ready. Check for receive failures.
            if sys_status.rxfce() == 0b1 {
                return Err(nb::Error::Other(Error::InvalidFrame));
            }
            if sys_status.rxrfsl() == 0b1 {
                return Err(nb::Error::Other(Error::InvalidFrame));
            }
            if sys_status.rxovrr() == 0b1 {
                return Err(nb::Error::Other(Error::InvalidFrame));
            }
            // The receiver's own timeouts surface like a missing reply.
            if sys_status.rxrfto() == 0b1
                || sys_status.rxpto() == 0b1
                || sys_status.rxsfdto() == 0b1
            {
                return Err(nb::Error::Other(Error::ExchangeTimeout));
            }

            // No failure detected. The frame is just not ready yet.
            return Err(nb::Error::WouldBlock);
        }

        // Wait until LDE processing is done. Before this is finished, the RX
        // time stamp is not available.
        if sys_status.ldedone() == 0b0 {
            return Err(nb::Error::WouldBlock);
        }

        let rx_stamp = self
            .ll
            .rx_time()
            .read()
            .map_err(|error| nb::Error::Other(Error::Spi(error)))?
            .rx_stamp();

        // `rx_stamp` comes from a 40-bit register field, so this will not
        // panic.
        let rx_time = Instant::new(rx_stamp).unwrap();

        // Reset the latched receive events for the next cycle.
        self.ll
            .sys_status()
            .write(|w| {
                w.ldedone(1)
                    .rxdfr(1)
                    .rxfcg(1)
                    .rxfce(1)
                    .rxrfsl(1)
                    .rxrfto(1)
                    .rxovrr(1)
                    .rxpto(1)
                    .rxsfdto(1)
                    .affrej(1)
            })
            .map_err(|error| nb::Error::Other(Error::Spi(error)))?;

        let rx_finfo = self
            .ll
            .rx_finfo()
            .read()
            .map_err(|error| nb::Error::Other(Error::Spi(error)))?;
        let rx_buffer = self
            .ll
            .rx_buffer()
            .read()
            .map_err(|error| nb::Error::Other(Error::Spi(error)))?;

        // The reported frame length includes the two-octet CRC, which is of
        // no use to us.
        let len = (rx_finfo.rxflen() as usize)
            .saturating_sub(2)
            .min(ll::BUFFER_LEN);

        let mut buffer = [0; ll::BUFFER_LEN];
        buffer[..len].copy_from_slice(&rx_buffer.data()[..len]);

        Ok(ReceivedFrame {
            rx_time,
            len,
            buffer,
        })
    }

    /// Force the transceiver into idle mode
    ///
    /// Sometimes the device gets stuck in RX mode; forcing it idle before
    /// state changes makes sure subsequent operations start from a known
    /// point.
    fn force_idle(&mut self) -> Result<(), Error<SPI, CS>> {
        self.ll.sys_ctrl().write(|w| w.trxoff(0b1))?;
        while self.ll.sys_ctrl().read()?.trxoff() == 0b1 {}

        Ok(())
    }

    fn read_tx_stamp(&mut self) -> Result<Instant, Error<SPI, CS>> {
        let tx_stamp = self.ll.tx_time().read()?.tx_stamp();

        // 40-bit register field; always in range.
        Ok(Instant::new(tx_stamp).unwrap())
    }

    /// Read the receive diagnostics of the exchange's last frame
    ///
    /// Returns the signal strength estimate in dBm and the derived quality
    /// percentage.
    fn read_signal_diagnostics(&mut self) -> Result<(i16, f32), Error<SPI, CS>> {
        let rx_fqual = self.ll.rx_fqual().read()?;
        let rxpacc = self.ll.rx_finfo().read()?.rxpacc();
        let fp_ampl1 = self.ll.rx_time().read()?.fp_ampl1();

        let prf = self.config.pulse_repetition_frequency;

        let rx_power = ranging::rx_power_estimate(rx_fqual.cir_pwr(), rxpacc, prf);
        let fp_power = ranging::first_path_power_estimate(
            fp_ampl1,
            rx_fqual.fp_ampl2(),
            rx_fqual.fp_ampl3(),
            rxpacc,
            prf,
        );

        if !rx_power.is_finite() || !fp_power.is_finite() {
            return Err(Error::BadRssiCalculation);
        }

        let quality = ranging::quality_estimate(rx_power, fp_power);

        Ok((rx_power as i16, quality))
    }
}

impl<SPI, CS, RESET, IRQ> Dwm1000<SPI, CS, RESET, IRQ>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
    IRQ: InputPin,
{
    /// Check whether a completed exchange is pending collection
    ///
    /// Reads the level of the interrupt line. Useful for a measurement loop
    /// that wants to poll cheaply between scheduled exchanges.
    pub fn data_available(&self) -> Result<bool, Error<SPI, CS>> {
        self.irq.is_high().map_err(|_| Error::Gpio)
    }
}

/// Decode a payload that must be the given message type
fn decode_expected<M, SPI, CS>(payload: &[u8]) -> Result<M, Error<SPI, CS>>
where
    M: Message,
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    match M::decode(payload)? {
        Some(message) => Ok(message),
        None => Err(Error::InvalidFrame),
    }
}
