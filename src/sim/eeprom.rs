use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use embedded_hal_async::spi::{ErrorType, Operation, SpiDevice};
use log::warn;

use crate::storage::eeprom::{
    INSTR_RDSR, INSTR_READ, INSTR_WRDI, INSTR_WREN, INSTR_WRITE, STATUS_WEL, STATUS_WIP,
};
use crate::storage::{PAGE_SIZE, STORE_SIZE};

/// Status polls a write cycle stays busy for
const DEFAULT_WRITE_CYCLE_POLLS: u32 = 2;

/// Bytes clocked in or out during one chip-select assertion
#[derive(Default)]
struct Frame {
    position: usize,
    instruction: u8,
    address: u16,
    data: Vec<u8>,
}

/// Byte-level model of a 25LC256.
///
/// Models the parts of the device the driver depends on: the write enable
/// latch, page-wrapping writes, a write cycle that reports busy for a
/// number of status polls, and instructions being ignored while busy.
pub struct EmulatedEeprom {
    memory: Vec<u8>,
    write_latch: bool,
    busy_polls: u32,
    write_cycle_polls: u32,
    stuck: bool,
    committed_writes: usize,
    ignored_writes: usize,
}

impl Default for EmulatedEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedEeprom {
    /// A blank device. Unprogrammed cells read as `0xFF`.
    pub fn new() -> Self {
        Self {
            memory: vec![0xFF; STORE_SIZE],
            write_latch: false,
            busy_polls: 0,
            write_cycle_polls: DEFAULT_WRITE_CYCLE_POLLS,
            stuck: false,
            committed_writes: 0,
            ignored_writes: 0,
        }
    }

    /// A device preloaded with `image`. Missing bytes read as `0xFF`.
    pub fn from_image(image: &[u8]) -> Self {
        let mut device = Self::new();
        let len = image.len().min(STORE_SIZE);
        device.memory[..len].copy_from_slice(&image[..len]);
        device
    }

    /// Full memory contents
    pub fn image(&self) -> &[u8] {
        &self.memory
    }

    /// Report a write in progress forever.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn set_write_cycle_polls(&mut self, polls: u32) {
        self.write_cycle_polls = polls;
    }

    /// Writes that reached the array
    pub fn committed_writes(&self) -> usize {
        self.committed_writes
    }

    /// Writes dropped because the latch was clear or a cycle was running
    pub fn ignored_writes(&self) -> usize {
        self.ignored_writes
    }

    fn busy(&self) -> bool {
        self.stuck || self.busy_polls > 0
    }

    fn status(&mut self) -> u8 {
        let mut status = if self.write_latch { STATUS_WEL } else { 0 };
        if self.busy() {
            status |= STATUS_WIP;
            self.busy_polls = self.busy_polls.saturating_sub(1);
        }
        status
    }

    fn exchange(&mut self, frame: &mut Frame, mosi: u8) -> u8 {
        let position = frame.position;
        frame.position += 1;

        if position == 0 {
            frame.instruction = mosi;
            if !self.busy() {
                match mosi {
                    INSTR_WREN => self.write_latch = true,
                    INSTR_WRDI => self.write_latch = false,
                    _ => {}
                }
            }
            return 0xFF;
        }

        match frame.instruction {
            INSTR_RDSR => self.status(),
            INSTR_READ | INSTR_WRITE if position < 3 => {
                frame.address = (frame.address << 8) | mosi as u16;
                0xFF
            }
            INSTR_READ => {
                let addr = (frame.address as usize + position - 3) % STORE_SIZE;
                self.memory[addr]
            }
            INSTR_WRITE => {
                frame.data.push(mosi);
                0xFF
            }
            _ => 0xFF,
        }
    }

    /// Chip select released: a pending write starts its cycle.
    fn finish(&mut self, frame: Frame) {
        if frame.instruction != INSTR_WRITE || frame.data.is_empty() {
            return;
        }
        if self.busy() || !self.write_latch {
            warn!(
                "Emulated EEPROM ignored write at {:#06x} (busy: {}, latch: {})",
                frame.address,
                self.busy(),
                self.write_latch
            );
            self.ignored_writes += 1;
            return;
        }

        let start = frame.address as usize % STORE_SIZE;
        let base = start - start % PAGE_SIZE;
        for (offset, byte) in frame.data.iter().enumerate() {
            self.memory[base + (start % PAGE_SIZE + offset) % PAGE_SIZE] = *byte;
        }

        self.write_latch = false;
        self.busy_polls = self.write_cycle_polls;
        self.committed_writes += 1;
    }
}

impl ErrorType for EmulatedEeprom {
    type Error = Infallible;
}

impl SpiDevice for EmulatedEeprom {
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

        self.finish(frame);
        Ok(())
    }
}
