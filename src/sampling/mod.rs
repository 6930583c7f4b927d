//! Accelerometer burst handling.
//!
//! A burst is one full LIS3DH FIFO: 32 levels of X/Y/Z samples, each a
//! little-endian 16-bit value. Bursts are reduced to the high byte of every
//! other level before they enter the history kept by [`SampleQueue`].

mod queue;

pub use queue::*;

/// FIFO levels in one burst
pub const FIFO_LEVELS: usize = 32;

/// Axes per FIFO level
pub const AXES: usize = 3;

/// Bytes per FIFO level (low + high byte for each axis)
pub const BYTES_PER_LEVEL: usize = AXES * 2;

/// Size of a raw burst as read from the sensor
pub const RAW_BURST_BYTES: usize = FIFO_LEVELS * BYTES_PER_LEVEL;

/// Keep one level out of this many
pub const DOWNSAMPLE_FACTOR: usize = 2;

/// Size of a burst after [`downsample`]
pub const REDUCED_BURST_BYTES: usize = FIFO_LEVELS / DOWNSAMPLE_FACTOR * AXES;

/// Bursts retained in the history
pub const QUEUE_DEPTH: usize = 6;

/// Total bytes of downsampled history
pub const HISTORY_BYTES: usize = REDUCED_BURST_BYTES * QUEUE_DEPTH;

/// Raw FIFO contents: `[x_l, x_h, y_l, y_h, z_l, z_h]` per level
pub type RawBurst = [u8; RAW_BURST_BYTES];

/// A downsampled burst: `[x_h, y_h, z_h]` for every other FIFO level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducedBurst(pub [u8; REDUCED_BURST_BYTES]);

impl ReducedBurst {
    pub fn as_bytes(&self) -> &[u8; REDUCED_BURST_BYTES] {
        &self.0
    }
}

/// High byte of the sample for `axis` at FIFO `level`
#[inline]
pub fn high_byte(raw: &RawBurst, level: usize, axis: usize) -> u8 {
    raw[level * BYTES_PER_LEVEL + axis * 2 + 1]
}

/// Reduce a raw burst to the 8-bit, half-rate representation kept in the
/// history: only the high byte of each sample, only even FIFO levels.
pub fn downsample(raw: &RawBurst) -> ReducedBurst {
    let mut reduced = [0u8; REDUCED_BURST_BYTES];

    for (i, level) in (0..FIFO_LEVELS).step_by(DOWNSAMPLE_FACTOR).enumerate() {
        for axis in 0..AXES {
            reduced[i * AXES + axis] = high_byte(raw, level, axis);
        }
    }

    ReducedBurst(reduced)
}
