//! Persistent event storage on the 25LC256 SPI EEPROM.
//!
//! The store is a linear 32 KiB address space split into 64-byte pages:
//!
//! | Address           | Contents                                   |
//! |-------------------|--------------------------------------------|
//! | `0x0000`          | control register (see [`ControlRegister`]) |
//! | `0x0008..0x000A`  | log page counter, little-endian `u16`      |
//! | `0x0040..0x8000`  | event pages, appended sequentially         |
//!
//! Everything above the driver is written against the [`PagedStore`] trait so
//! the catalog logic can run on the host against an emulated device.

pub mod catalog;
pub mod control;
pub mod eeprom;
pub mod record;

pub use catalog::*;
pub use control::*;
pub use eeprom::Eeprom25lc256;
pub use record::*;

use embedded_hal::spi::ErrorKind;
use thiserror_no_std::Error;

/// Size of one programmable page in bytes
pub const PAGE_SIZE: usize = 64;

/// Number of pages on the device
pub const PAGE_COUNT: usize = 512;

/// Total addressable bytes (32 KiB)
pub const STORE_SIZE: usize = PAGE_SIZE * PAGE_COUNT;

/// Address of the persisted control register byte
pub const CONTROL_REGISTER_ADDR: u16 = 0x0000;

/// Address of the low byte of the log page counter
pub const PAGE_COUNTER_LOW_ADDR: u16 = 0x0008;

/// Address of the high byte of the log page counter
pub const PAGE_COUNTER_HIGH_ADDR: u16 = 0x0009;

/// First address of the event-data region (page 1)
pub const LOG_DATA_BASE_ADDR: u16 = 0x0040;

/// Pages available to event data: everything after the control page
pub const LOG_PAGE_CAPACITY: u16 = ((STORE_SIZE - LOG_DATA_BASE_ADDR as usize) / PAGE_SIZE) as u16;

/// Errors raised by a paged store
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("SPI transfer failed: {0:?}")]
    Bus(ErrorKind),
    #[error("write cycle still in progress after {polls} status polls")]
    Timeout { polls: u32 },
    #[error("access of {len} bytes at {addr:#06x} leaves the store")]
    OutOfRange { addr: u32, len: usize },
}

/// Byte and page access to a slow, write-enable gated non-volatile store.
///
/// Writes return as soon as the device has accepted the data. Callers that
/// need the data committed before the next access must call
/// [`PagedStore::wait_for_completion`]. Nothing is retried internally.
pub trait PagedStore {
    /// Read a single byte.
    fn read_byte(&mut self, addr: u16) -> impl Future<Output = Result<u8, StoreError>>;

    /// Program a single byte.
    fn write_byte(&mut self, addr: u16, value: u8) -> impl Future<Output = Result<(), StoreError>>;

    /// Read `buf.len()` consecutive bytes starting at `addr`.
    fn read_page(
        &mut self,
        addr: u16,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(), StoreError>>;

    /// Program up to one page of bytes starting at `addr`.
    ///
    /// Bytes that run past the end of the page containing `addr` wrap around
    /// to the start of that same page on the device. Callers must keep writes
    /// page-aligned.
    fn write_page(&mut self, addr: u16, data: &[u8]) -> impl Future<Output = Result<(), StoreError>>;

    /// Block until the previous write has been committed.
    fn wait_for_completion(&mut self) -> impl Future<Output = Result<(), StoreError>>;
}

/// Reject accesses that leave the address space
pub(crate) fn check_range(addr: u16, len: usize) -> Result<(), StoreError> {
    if addr as usize + len > STORE_SIZE {
        return Err(StoreError::OutOfRange {
            addr: addr as u32,
            len,
        });
    }
    Ok(())
}

/// Address of the page containing `addr`
pub const fn page_base(addr: u16) -> u16 {
    addr - (addr % PAGE_SIZE as u16)
}
