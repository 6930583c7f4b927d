//! Remote commands received over the serial link.
//!
//! | Byte(s)      | Command                | Reply                          |
//! |--------------|------------------------|--------------------------------|
//! | `R`          | erase the whole store  | `ACK` once done                |
//! | `N`          | number of stored events| one byte                       |
//! | `C`          | control register       | one byte                       |
//! | `L` `<id>`   | send event `id`        | five 64-byte pages, or `NAK`   |

use embedded_io_async::{Read, Write};
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::storage::{
    CONTROL_REGISTER_ADDR, CatalogError, EventCatalog, PAGES_PER_EVENT, PagedStore, StoreError,
};
use crate::telemetry::send_page;

pub const OPCODE_ERASE_ALL: u8 = b'R';
pub const OPCODE_EVENT_COUNT: u8 = b'N';
pub const OPCODE_CONTROL_REGISTER: u8 = b'C';
pub const OPCODE_SEND_EVENT: u8 = b'L';

/// Sent when an erase has completed
pub const ACK: u8 = b'K';
/// Sent instead of an event that is not stored
pub const NAK: u8 = 0x15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EraseAll,
    EventCount,
    ControlRegister,
    SendEvent(u8),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("serial link failed: {0:?}")]
    Link(embedded_io::ErrorKind),
    #[error("link closed in the middle of a command")]
    UnexpectedEof,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("{0}")]
    Catalog(CatalogError),
}

impl From<CatalogError> for CommandError {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self::Catalog(CatalogError::Store(e))
    }
}

fn link_error<E: embedded_io::Error>(e: E) -> CommandError {
    CommandError::Link(e.kind())
}

/// Incremental decoder for bytes arriving one at a time, e.g. from a UART
/// receive interrupt.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandDecoder {
    awaiting_id: bool,
}

impl CommandDecoder {
    pub const fn new() -> Self {
        Self { awaiting_id: false }
    }

    /// Feed one byte. Returns a command once it is complete.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Command>, CommandError> {
        if self.awaiting_id {
            self.awaiting_id = false;
            return Ok(Some(Command::SendEvent(byte)));
        }

        match byte {
            OPCODE_ERASE_ALL => Ok(Some(Command::EraseAll)),
            OPCODE_EVENT_COUNT => Ok(Some(Command::EventCount)),
            OPCODE_CONTROL_REGISTER => Ok(Some(Command::ControlRegister)),
            OPCODE_SEND_EVENT => {
                self.awaiting_id = true;
                Ok(None)
            }
            other => Err(CommandError::UnknownOpcode(other)),
        }
    }

    /// True while an opcode has been seen but its argument has not
    pub fn is_partial(&self) -> bool {
        self.awaiting_id
    }
}

/// Read bytes from `link` until one command is complete.
pub async fn read_command<R: Read>(link: &mut R) -> Result<Command, CommandError> {
    let mut decoder = CommandDecoder::new();
    let mut byte = [0u8; 1];

    loop {
        if link.read(&mut byte).await.map_err(link_error)? == 0 {
            return Err(CommandError::UnexpectedEof);
        }
        if let Some(command) = decoder.feed(byte[0])? {
            return Ok(command);
        }
    }
}

/// Run `command` against the catalog and write the reply to `link`.
pub async fn execute<P, W>(
    command: Command,
    catalog: &mut EventCatalog<P>,
    link: &mut W,
) -> Result<(), CommandError>
where
    P: PagedStore,
    W: Write,
{
    debug!("Executing {:?}", command);

    match command {
        Command::EraseAll => {
            catalog.erase_all().await?;
            link.write_all(&[ACK]).await.map_err(link_error)?;
        }
        Command::EventCount => {
            let count = catalog.event_count().await?;
            link.write_all(&[count]).await.map_err(link_error)?;
        }
        Command::ControlRegister => {
            let register = catalog.store_mut().read_byte(CONTROL_REGISTER_ADDR).await?;
            link.write_all(&[register]).await.map_err(link_error)?;
        }
        Command::SendEvent(id) => match catalog.read_event(id).await {
            Ok(record) => {
                for page in &record.pages {
                    send_page(link, page).await.map_err(link_error)?;
                }
                info!("Sent event {} ({} pages)", id, PAGES_PER_EVENT);
            }
            Err(CatalogError::NotFound(_)) | Err(CatalogError::TornEvent { .. }) => {
                warn!("Event {} requested but not stored", id);
                link.write_all(&[NAK]).await.map_err(link_error)?;
            }
            Err(e) => return Err(e.into()),
        },
    }

    link.flush().await.map_err(link_error)
}
