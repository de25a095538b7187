//! A scripted register-file simulation of the DWM1000
//!
//! Implements the `embedded-hal` traits the driver is generic over, decodes
//! the single-byte-header wire format, and models just enough device
//! behavior to drive complete ranging exchanges: write-1-to-clear event
//! flags, self-clearing control bits, delayed transmission, and scripted
//! inbound frames. Transactions and chip-select edges are counted so tests
//! can assert on bus traffic.

// Not every test binary exercises every scripting hook.
#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, rc::Rc};

use embedded_hal::{
    blocking::{
        delay::DelayMs,
        spi::{Transfer, Write},
    },
    digital::v2::{InputPin, OutputPin},
};

use dwm1000_ranging::{
    ranging::Message,
    time::MonotonicClock,
    Config, Dwm1000,
};

const REG_COUNT: usize = 0x20;
const REG_SIZE: usize = 32;

const REG_DEV_ID: usize = 0x00;
const REG_SYS_TIME: usize = 0x06;
const REG_TX_FCTRL: usize = 0x08;
const REG_TX_BUFFER: usize = 0x09;
const REG_DX_TIME: usize = 0x0a;
const REG_SYS_CTRL: usize = 0x0d;
const REG_SYS_STATUS: usize = 0x0f;
const REG_RX_FINFO: usize = 0x10;
const REG_RX_BUFFER: usize = 0x11;
const REG_RX_FQUAL: usize = 0x12;
const REG_RX_TIME: usize = 0x15;
const REG_TX_TIME: usize = 0x17;

/// A frame scripted to arrive at the simulated device
pub struct InboundFrame {
    pub payload: Vec<u8>,
    pub rx_stamp: u64,
    pub rxpacc: u16,
    pub fp_ampl1: u16,
    pub fp_ampl2: u16,
    pub fp_ampl3: u16,
    pub cir_pwr: u16,
}

impl InboundFrame {
    /// A frame with clean line-of-sight diagnostics
    pub fn new(payload: Vec<u8>, rx_stamp: u64) -> Self {
        InboundFrame {
            payload,
            rx_stamp,
            rxpacc: 128,
            fp_ampl1: 6600,
            fp_ampl2: 6600,
            fp_ampl3: 6600,
            cir_pwr: 1000,
        }
    }

    /// Degrade the diagnostics to look like an obstructed exchange
    pub fn with_weak_first_path(mut self) -> Self {
        self.fp_ampl1 = 660;
        self.fp_ampl2 = 660;
        self.fp_ampl3 = 660;
        self
    }
}

pub struct SimDevice {
    regs: [[u8; REG_SIZE]; REG_COUNT],
    selected: bool,
    current: Vec<u8>,
    streamed: usize,
    transactions: usize,
    selects: usize,
    deselects: usize,
    irq: bool,
    inbound: VecDeque<InboundFrame>,
    sent: Vec<Vec<u8>>,
}

impl SimDevice {
    fn new() -> Self {
        let mut device = SimDevice {
            regs: [[0; REG_SIZE]; REG_COUNT],
            selected: false,
            current: Vec::new(),
            streamed: 0,
            transactions: 0,
            selects: 0,
            deselects: 0,
            irq: false,
            inbound: VecDeque::new(),
            sent: Vec::new(),
        };

        device.set_identity(0xDECA0130);
        device.set_system_time(1_000_000);

        device
    }

    fn set_identity(&mut self, identity: u32) {
        self.regs[REG_DEV_ID][..4].copy_from_slice(&identity.to_le_bytes());
    }

    fn set_system_time(&mut self, time: u64) {
        self.regs[REG_SYS_TIME][..5].copy_from_slice(&time.to_le_bytes()[..5]);
    }

    fn system_time(&self) -> u64 {
        read_40_bit(&self.regs[REG_SYS_TIME])
    }

    fn select(&mut self) {
        // Repeated low writes are the settling margin, not a new window.
        if !self.selected {
            self.selected = true;
            self.selects += 1;
            self.current.clear();
            self.streamed = 0;
        }
    }

    fn deselect(&mut self) {
        if self.selected {
            self.commit();
            self.selected = false;
            self.deselects += 1;
        }
    }

    fn mosi_write(&mut self, words: &[u8]) {
        assert!(self.selected, "bus write without chip select asserted");
        self.current.extend_from_slice(words);
    }

    fn transfer(&mut self, words: &mut [u8]) {
        assert!(self.selected, "bus transfer without chip select asserted");

        if self.current.is_empty() {
            // Header and data in one transfer; the first response byte is
            // clocked while the header is still going out.
            let header = words[0];
            self.current.push(header);
            let address = (header & 0x7f) as usize;
            words[0] = 0;
            for (offset, word) in words[1..].iter_mut().enumerate() {
                *word = self.register_byte(address, offset);
            }
            self.streamed = words.len() - 1;
        } else {
            let address = (self.current[0] & 0x7f) as usize;
            for (offset, word) in words.iter_mut().enumerate() {
                *word = self.register_byte(address, self.streamed + offset);
            }
            self.streamed += words.len();
        }
    }

    fn register_byte(&self, address: usize, offset: usize) -> u8 {
        if address < REG_COUNT && offset < REG_SIZE {
            self.regs[address][offset]
        } else {
            0
        }
    }

    fn commit(&mut self) {
        if self.current.is_empty() {
            return;
        }

        self.transactions += 1;

        let header = self.current[0];
        if header & 0x80 == 0 {
            return;
        }

        let address = (header & 0x7f) as usize;
        let data: Vec<u8> = self.current[1..].to_vec();

        match address {
            REG_SYS_CTRL => self.system_control(&data),
            REG_SYS_STATUS => {
                // Event flags are write-1-to-clear.
                for (offset, byte) in data.iter().copied().enumerate() {
                    if offset < REG_SIZE {
                        self.regs[REG_SYS_STATUS][offset] &= !byte;
                    }
                }
                if self.regs[REG_SYS_STATUS][1] & 0x20 == 0 {
                    self.irq = false;
                }
            }
            _ => {
                if address < REG_COUNT {
                    let len = data.len().min(REG_SIZE);
                    self.regs[address][..len].copy_from_slice(&data[..len]);
                }
            }
        }
    }

    /// Control bits are self-clearing; the register itself stays zero.
    fn system_control(&mut self, data: &[u8]) {
        let mut value = [0; 4];
        let len = data.len().min(4);
        value[..len].copy_from_slice(&data[..len]);
        let value = u32::from_le_bytes(value);

        let txstrt = value & (1 << 1) != 0;
        let txdlys = value & (1 << 2) != 0;
        let trxoff = value & (1 << 6) != 0;
        let wait4resp = value & (1 << 7) != 0;
        let rxenab = value & (1 << 8) != 0;

        if trxoff {
            self.regs[REG_SYS_STATUS] = [0; REG_SIZE];
            self.irq = false;
        }

        if txstrt {
            let tx_stamp = if txdlys {
                read_40_bit(&self.regs[REG_DX_TIME])
            } else {
                self.system_time()
            };
            self.regs[REG_TX_TIME][..5].copy_from_slice(&tx_stamp.to_le_bytes()[..5]);

            let frame_len = (self.regs[REG_TX_FCTRL][0] & 0x7f) as usize;
            let payload_len = frame_len.saturating_sub(2).min(REG_SIZE);
            let payload = self.regs[REG_TX_BUFFER][..payload_len].to_vec();
            self.sent.push(payload);

            // TX Frame Sent
            self.regs[REG_SYS_STATUS][0] |= 1 << 7;

            // The receiver only listens after a transmission when asked to.
            if wait4resp {
                self.deliver_next();
            }
        }

        if rxenab {
            self.deliver_next();
        }
    }

    fn deliver_next(&mut self) {
        let frame = match self.inbound.pop_front() {
            Some(frame) => frame,
            None => return,
        };

        let len = frame.payload.len().min(REG_SIZE);
        self.regs[REG_RX_BUFFER][..len].copy_from_slice(&frame.payload[..len]);

        // Frame length includes the two-octet CRC; preamble count sits in
        // bits 20..31.
        let mut rx_finfo = [0u8; 4];
        rx_finfo[0] = (len as u8 + 2) & 0x7f;
        rx_finfo[2] = ((frame.rxpacc & 0x0f) << 4) as u8;
        rx_finfo[3] = (frame.rxpacc >> 4) as u8;
        self.regs[REG_RX_FINFO][..4].copy_from_slice(&rx_finfo);

        self.regs[REG_RX_TIME] = [0; REG_SIZE];
        self.regs[REG_RX_TIME][..5].copy_from_slice(&frame.rx_stamp.to_le_bytes()[..5]);
        self.regs[REG_RX_TIME][7..9].copy_from_slice(&frame.fp_ampl1.to_le_bytes());

        self.regs[REG_RX_FQUAL][2..4].copy_from_slice(&frame.fp_ampl2.to_le_bytes());
        self.regs[REG_RX_FQUAL][4..6].copy_from_slice(&frame.fp_ampl3.to_le_bytes());
        self.regs[REG_RX_FQUAL][6..8].copy_from_slice(&frame.cir_pwr.to_le_bytes());

        // RX Data Frame Ready + LDE Processing Done
        self.regs[REG_SYS_STATUS][1] |= (1 << 5) | (1 << 2);
        self.irq = true;
    }
}

fn read_40_bit(register: &[u8]) -> u64 {
    let mut bytes = [0; 8];
    bytes[..5].copy_from_slice(&register[..5]);
    u64::from_le_bytes(bytes)
}

/// Shared handle to a simulated device
#[derive(Clone)]
pub struct SimHandle(Rc<RefCell<SimDevice>>);

impl SimHandle {
    pub fn new() -> Self {
        SimHandle(Rc::new(RefCell::new(SimDevice::new())))
    }

    pub fn set_identity(&self, identity: u32) {
        self.0.borrow_mut().set_identity(identity);
    }

    pub fn set_system_time(&self, time: u64) {
        self.0.borrow_mut().set_system_time(time);
    }

    pub fn system_time(&self) -> u64 {
        self.0.borrow().system_time()
    }

    pub fn queue_frame(&self, frame: InboundFrame) {
        self.0.borrow_mut().inbound.push_back(frame);
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.0.borrow().sent.clone()
    }

    pub fn transactions(&self) -> usize {
        self.0.borrow().transactions
    }

    pub fn select_balanced(&self) -> bool {
        let device = self.0.borrow();
        !device.selected && device.selects == device.deselects
    }

    pub fn register(&self, address: usize) -> Vec<u8> {
        self.0.borrow().regs[address].to_vec()
    }
}

pub struct SimSpi(SimHandle);

impl Transfer<u8> for SimSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
        (self.0).0.borrow_mut().transfer(words);
        Ok(words)
    }
}

impl Write<u8> for SimSpi {
    type Error = Infallible;

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        (self.0).0.borrow_mut().mosi_write(words);
        Ok(())
    }
}

pub struct SimCsPin(SimHandle);

impl OutputPin for SimCsPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        (self.0).0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        (self.0).0.borrow_mut().deselect();
        Ok(())
    }
}

pub struct SimResetPin;

impl OutputPin for SimResetPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

pub struct SimIrqPin(SimHandle);

impl InputPin for SimIrqPin {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Infallible> {
        Ok((self.0).0.borrow().irq)
    }

    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(!(self.0).0.borrow().irq)
    }
}

/// A delay provider that only accounts for the time it was asked to spend
pub struct MockDelay {
    pub total_ms: u32,
}

impl MockDelay {
    pub fn new() -> Self {
        MockDelay { total_ms: 0 }
    }
}

impl DelayMs<u8> for MockDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.total_ms += ms as u32;
    }
}

/// A virtual monotonic clock
///
/// Advances by `step` milliseconds on every query, so bounded waits in the
/// driver make progress without real time passing; `advance` moves it
/// explicitly.
pub struct TestClock {
    now: u32,
    step: u32,
}

impl TestClock {
    pub fn new() -> Self {
        TestClock { now: 0, step: 1 }
    }

    pub fn with_step(step: u32) -> Self {
        TestClock { now: 0, step }
    }

    pub fn advance(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
    }
}

impl MonotonicClock for TestClock {
    fn now_ms(&mut self) -> u32 {
        let now = self.now;
        self.now = self.now.wrapping_add(self.step);
        now
    }
}

/// A driver wired to the simulated device
pub type SimDriver = Dwm1000<SimSpi, SimCsPin, SimResetPin, SimIrqPin>;

pub fn driver(handle: &SimHandle, config: Config) -> SimDriver {
    Dwm1000::new(
        SimSpi(handle.clone()),
        SimCsPin(handle.clone()),
        SimResetPin,
        SimIrqPin(handle.clone()),
        config,
    )
}

pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    let mut buffer = [0; 32];
    let len = message.encode(&mut buffer).unwrap();
    buffer[..len].to_vec()
}
