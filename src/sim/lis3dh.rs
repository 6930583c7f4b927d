use alloc::collections::VecDeque;
use core::convert::Infallible;

use embedded_hal_async::spi::{ErrorType, Operation, SpiDevice};

use crate::sampling::{BYTES_PER_LEVEL, FIFO_LEVELS, RawBurst};
use crate::sensors::lis3dh::{
    DEVICE_ID, FIFO_CTRL_REG, FIFO_SRC_OVRN, FIFO_SRC_REG, INT1_SRC, INT1_SRC_IA, MULTI_BIT,
    OUT_X_L, READ_BIT, WHO_AM_I,
};

const REGISTER_COUNT: usize = 0x40;
const ADDRESS_MASK: u8 = 0x3F;
const OUT_Z_H: u8 = OUT_X_L + BYTES_PER_LEVEL as u8 - 1;
const FIFO_MODE_MASK: u8 = 0xC0;

type Level = [u8; BYTES_PER_LEVEL];

#[derive(Default)]
struct Frame {
    position: usize,
    read: bool,
    increment: bool,
    register: u8,
}

/// Register-level model of a LIS3DH.
///
/// Tests and the simulator feed it bursts with [`EmulatedLis3dh::load_burst`]
/// and threshold activity with [`EmulatedLis3dh::trigger_threshold`].
pub struct EmulatedLis3dh {
    registers: [u8; REGISTER_COUNT],
    fifo: VecDeque<Level>,
    threshold_source: u8,
    threshold_reads: u32,
}

impl Default for EmulatedLis3dh {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedLis3dh {
    pub fn new() -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[WHO_AM_I as usize] = DEVICE_ID;
        Self {
            registers,
            fifo: VecDeque::new(),
            threshold_source: 0,
            threshold_reads: 0,
        }
    }

    pub fn set_identity(&mut self, id: u8) {
        self.registers[WHO_AM_I as usize] = id;
    }

    /// Stored register value, without read side effects
    pub fn register(&self, register: u8) -> u8 {
        self.registers[(register & ADDRESS_MASK) as usize]
    }

    /// Levels waiting in the FIFO
    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    /// Fill the FIFO with one burst. Levels beyond the FIFO depth are lost.
    pub fn load_burst(&mut self, burst: &RawBurst) {
        for chunk in burst.chunks_exact(BYTES_PER_LEVEL) {
            if self.fifo.len() == FIFO_LEVELS {
                break;
            }
            let mut level = [0u8; BYTES_PER_LEVEL];
            level.copy_from_slice(chunk);
            self.fifo.push_back(level);
        }
    }

    /// INT1_SRC reads left before the threshold activity clears
    pub fn threshold_reads_left(&self) -> u32 {
        self.threshold_reads
    }

    /// Report an active threshold event with the given axis bits for the
    /// next `reads` reads of INT1_SRC.
    pub fn trigger_threshold(&mut self, axes: u8, reads: u32) {
        self.threshold_source = axes | INT1_SRC_IA;
        self.threshold_reads = reads;
    }

    fn read(&mut self, register: u8) -> u8 {
        match register {
            OUT_X_L..=OUT_Z_H => {
                let offset = (register - OUT_X_L) as usize;
                let value = self.fifo.front().map_or(0, |level| level[offset]);
                if register == OUT_Z_H {
                    self.fifo.pop_front();
                }
                value
            }
            FIFO_SRC_REG => {
                let stored = self.fifo.len().min(FIFO_LEVELS - 1) as u8;
                if self.fifo.len() >= FIFO_LEVELS {
                    FIFO_SRC_OVRN | stored
                } else {
                    stored
                }
            }
            INT1_SRC => {
                if self.threshold_reads > 0 {
                    self.threshold_reads -= 1;
                    self.threshold_source
                } else {
                    0
                }
            }
            _ => self.registers[register as usize],
        }
    }

    fn write(&mut self, register: u8, value: u8) {
        self.registers[register as usize] = value;
        if register == FIFO_CTRL_REG && value & FIFO_MODE_MASK == 0 {
            // Bypass mode empties the FIFO.
            self.fifo.clear();
        }
    }

    fn next_register(register: u8) -> u8 {
        // Output registers roll over so the FIFO can be drained level by level.
        if register == OUT_Z_H {
            OUT_X_L
        } else {
            (register + 1) & ADDRESS_MASK
        }
    }

    fn exchange(&mut self, frame: &mut Frame, mosi: u8) -> u8 {
        let position = frame.position;
        frame.position += 1;

        if position == 0 {
            frame.read = mosi & READ_BIT != 0;
            frame.increment = mosi & MULTI_BIT != 0;
            frame.register = mosi & ADDRESS_MASK;
            return 0xFF;
        }

        let register = frame.register;
        if frame.increment {
            frame.register = Self::next_register(register);
        }

        if frame.read {
            self.read(register)
        } else {
            self.write(register, mosi);
            0xFF
        }
    }
}

impl ErrorType for EmulatedLis3dh {
    type Error = Infallible;
}

impl SpiDevice for EmulatedLis3dh {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mut frame = Frame::default();

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    for byte in bytes.iter() {
                        self.exchange(&mut frame, *byte);
                    }
                }
                Operation::Read(buf) => {
                    for slot in buf.iter_mut() {
                        *slot = self.exchange(&mut frame, 0x00);
                    }
                }
                Operation::Transfer(read, write) => {
                    for i in 0..read.len().max(write.len()) {
                        let miso = self.exchange(&mut frame, write.get(i).copied().unwrap_or(0));
                        if let Some(slot) = read.get_mut(i) {
                            *slot = miso;
                        }
                    }
                }
                Operation::TransferInPlace(buf) => {
                    for slot in buf.iter_mut() {
                        *slot = self.exchange(&mut frame, *slot);
                    }
                }
                Operation::DelayNs(_) => {}
            }
        }

        Ok(())
    }
}
