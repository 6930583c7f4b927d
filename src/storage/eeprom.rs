//! Driver for the Microchip 25LC256 SPI EEPROM.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{Operation, SpiDevice};
use log::{error, warn};

use super::{PAGE_SIZE, PagedStore, StoreError, check_range, page_base};
use crate::config::StoreConfig;

/// Read data from memory array
pub const INSTR_READ: u8 = 0b0000_0011;
/// Write data to memory array
pub const INSTR_WRITE: u8 = 0b0000_0010;
/// Reset the write enable latch
pub const INSTR_WRDI: u8 = 0b0000_0100;
/// Set the write enable latch
pub const INSTR_WREN: u8 = 0b0000_0110;
/// Read status register
pub const INSTR_RDSR: u8 = 0b0000_0101;

/// Status register: write cycle in progress
pub const STATUS_WIP: u8 = 1 << 0;
/// Status register: write enable latch set
pub const STATUS_WEL: u8 = 1 << 1;

/// 25LC256 on an exclusive or shared SPI device.
///
/// Every write is preceded by its own WREN transaction because the device
/// clears the write enable latch at the end of each write cycle.
pub struct Eeprom25lc256<S, D> {
    spi: S,
    delay: D,
    config: StoreConfig,
}

impl<S, D> Eeprom25lc256<S, D>
where
    S: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: S, delay: D, config: StoreConfig) -> Self {
        Self { spi, delay, config }
    }

    pub fn device(&self) -> &S {
        &self.spi
    }

    pub fn device_mut(&mut self) -> &mut S {
        &mut self.spi
    }

    /// Release the underlying SPI device and delay provider.
    pub fn release(self) -> (S, D) {
        (self.spi, self.delay)
    }

    /// Read the device status register.
    pub async fn read_status(&mut self) -> Result<u8, StoreError> {
        let mut status = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&[INSTR_RDSR]),
                Operation::Read(&mut status),
            ])
            .await
            .map_err(bus_error)?;
        Ok(status[0])
    }

    async fn write_enable(&mut self) -> Result<(), StoreError> {
        self.spi.write(&[INSTR_WREN]).await.map_err(bus_error)
    }
}

fn address_header(instruction: u8, addr: u16) -> [u8; 3] {
    let [high, low] = addr.to_be_bytes();
    [instruction, high, low]
}

fn bus_error<E: embedded_hal::spi::Error>(e: E) -> StoreError {
    StoreError::Bus(e.kind())
}

impl<S, D> PagedStore for Eeprom25lc256<S, D>
where
    S: SpiDevice,
    D: DelayNs,
{
    async fn read_byte(&mut self, addr: u16) -> Result<u8, StoreError> {
        check_range(addr, 1)?;

        let mut value = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&address_header(INSTR_READ, addr)),
                Operation::Read(&mut value),
            ])
            .await
            .map_err(bus_error)?;
        Ok(value[0])
    }

    async fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), StoreError> {
        check_range(addr, 1)?;

        self.write_enable().await?;
        self.spi
            .transaction(&mut [
                Operation::Write(&address_header(INSTR_WRITE, addr)),
                Operation::Write(&[value]),
            ])
            .await
            .map_err(bus_error)
    }

    async fn read_page(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), StoreError> {
        check_range(addr, buf.len())?;

        self.spi
            .transaction(&mut [
                Operation::Write(&address_header(INSTR_READ, addr)),
                Operation::Read(buf),
            ])
            .await
            .map_err(bus_error)
    }

    async fn write_page(&mut self, addr: u16, data: &[u8]) -> Result<(), StoreError> {
        check_range(addr, data.len())?;
        if data.len() > PAGE_SIZE {
            return Err(StoreError::OutOfRange {
                addr: addr as u32,
                len: data.len(),
            });
        }
        if data.len() > 1 && page_base(addr) != page_base(addr + data.len() as u16 - 1) {
            warn!(
                "Page write of {} bytes at {:#06x} crosses a page boundary and will wrap",
                data.len(),
                addr
            );
        }

        self.write_enable().await?;
        self.spi
            .transaction(&mut [
                Operation::Write(&address_header(INSTR_WRITE, addr)),
                Operation::Write(data),
            ])
            .await
            .map_err(bus_error)
    }

    async fn wait_for_completion(&mut self) -> Result<(), StoreError> {
        // Polls are bounded so a missing or faulty device surfaces as an error
        // instead of hanging the caller.
        for _ in 0..self.config.max_write_polls {
            if self.read_status().await? & STATUS_WIP == 0 {
                return Ok(());
            }
            self.delay.delay_us(self.config.poll_interval_us).await;
        }

        error!(
            "EEPROM write not committed after {} polls",
            self.config.max_write_polls
        );
        Err(StoreError::Timeout {
            polls: self.config.max_write_polls,
        })
    }
}
