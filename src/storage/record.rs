//! Event record binary format.
//!
//! An event occupies [`PAGES_PER_EVENT`] consecutive store pages. Each page
//! is one [`LogPage`]:
//!
//! Binary format (64 bytes, little-endian):
//! - id: 1 byte (u8), shared by all pages of the event
//! - status: 1 byte (u8), INT1_SRC value that triggered the event
//! - timestamp: 2 bytes (u16), seconds since boot
//! - payload: 60 bytes of downsampled accelerometer history

use super::PAGE_SIZE;

/// Header bytes at the start of every log page
pub const HEADER_SIZE: usize = 4;

/// Payload bytes per log page
pub const PAYLOAD_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

/// Pages written for one over-threshold event
pub const PAGES_PER_EVENT: usize = 5;

/// Number of zero bytes padding the last payload of an event
pub const EVENT_PADDING: usize = PAYLOAD_SIZE * PAGES_PER_EVENT - crate::sampling::HISTORY_BYTES;

/// One 64-byte page of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPage {
    pub id: u8,
    pub status: u8,
    pub timestamp: u16,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl LogPage {
    pub const fn new(id: u8, status: u8, timestamp: u16, payload: [u8; PAYLOAD_SIZE]) -> Self {
        Self {
            id,
            status,
            timestamp,
            payload,
        }
    }

    /// Converts the page to its stored representation.
    pub fn to_bytes(&self) -> [u8; PAGE_SIZE] {
        let mut bytes = [0u8; PAGE_SIZE];
        bytes[0] = self.id;
        bytes[1] = self.status;
        bytes[2..4].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[HEADER_SIZE..].copy_from_slice(&self.payload);
        bytes
    }

    /// Parses a stored page.
    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[HEADER_SIZE..]);

        Self {
            id: bytes[0],
            status: bytes[1],
            timestamp: u16::from_le_bytes([bytes[2], bytes[3]]),
            payload,
        }
    }
}

/// One accelerometer sample as stored in the history: the high byte of each
/// axis, i.e. a signed 8-bit reading at 16 mg/LSB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisSample {
    pub x: i8,
    pub y: i8,
    pub z: i8,
}

/// A complete event as read back from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub pages: [LogPage; PAGES_PER_EVENT],
}

impl EventRecord {
    pub fn id(&self) -> u8 {
        self.pages[0].id
    }

    pub fn status(&self) -> u8 {
        self.pages[0].status
    }

    pub fn timestamp(&self) -> u16 {
        self.pages[0].timestamp
    }

    /// Samples in capture order, oldest first, without the trailing padding.
    pub fn samples(&self) -> impl Iterator<Item = AxisSample> + '_ {
        let len = PAYLOAD_SIZE * PAGES_PER_EVENT - EVENT_PADDING;
        let mut bytes = self
            .pages
            .iter()
            .flat_map(|page| page.payload.iter().copied())
            .take(len);

        core::iter::from_fn(move || {
            Some(AxisSample {
                x: bytes.next()? as i8,
                y: bytes.next()? as i8,
                z: bytes.next()? as i8,
            })
        })
    }
}
