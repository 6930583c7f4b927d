use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::convert::Infallible;

use embedded_io_async::{ErrorType, Read, Write};

/// In-memory duplex byte link.
///
/// Bytes queued with [`SerialLink::push_rx`] are handed to readers; an empty
/// receive queue reads as end of stream. Everything written is kept until
/// taken with [`SerialLink::take_tx`].
#[derive(Debug, Default)]
pub struct SerialLink {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl SerialLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    pub fn take_tx(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }
}

impl ErrorType for SerialLink {
    type Error = Infallible;
}

impl Read for SerialLink {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.rx.pop_front() {
                Some(byte) => *slot = byte,
                None => break,
            }
            count += 1;
        }
        Ok(count)
    }
}

impl Write for SerialLink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}
