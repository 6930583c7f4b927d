//! Outbound byte framing for raw bursts and stored event pages.

use embedded_io_async::Write;

use crate::sampling::{AXES, FIFO_LEVELS, RawBurst, high_byte};
use crate::storage::{LogPage, PAGE_SIZE};

/// First byte of a burst frame
pub const FRAME_HEADER: u8 = 0xA0;
/// Last byte of a burst frame
pub const FRAME_TRAILER: u8 = 0xC0;
/// Header, one high byte per axis, trailer
pub const FRAME_SIZE: usize = AXES + 2;

/// Frame for one FIFO level: `[0xA0, x_hi, y_hi, z_hi, 0xC0]`
pub fn level_frame(raw: &RawBurst, level: usize) -> [u8; FRAME_SIZE] {
    [
        FRAME_HEADER,
        high_byte(raw, level, 0),
        high_byte(raw, level, 1),
        high_byte(raw, level, 2),
        FRAME_TRAILER,
    ]
}

/// Forward every level of a raw burst, one frame per level.
pub async fn send_burst<W: Write>(link: &mut W, raw: &RawBurst) -> Result<(), W::Error> {
    for level in 0..FIFO_LEVELS {
        link.write_all(&level_frame(raw, level)).await?;
    }
    link.flush().await
}

/// Send a stored page exactly as it sits in the store.
pub async fn send_page<W: Write>(link: &mut W, page: &LogPage) -> Result<(), W::Error> {
    let bytes: [u8; PAGE_SIZE] = page.to_bytes();
    link.write_all(&bytes).await
}
