pub mod lis3dh;

pub use lis3dh::Lis3dh;

use embedded_hal::spi::ErrorKind;
use thiserror_no_std::Error;

use crate::sampling::RawBurst;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("reading register {register:#04x} failed: {kind:?}")]
    ReadFailed { register: u8, kind: ErrorKind },
    #[error("writing register {register:#04x} failed: {kind:?}")]
    WriteFailed { register: u8, kind: ErrorKind },
    #[error("unexpected device identity {found:#04x}")]
    IdentityMismatch { found: u8 },
}

/// Interrupt sources pending on the sensor's INT1 line
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterruptSources {
    /// The FIFO overran: a full burst is waiting
    pub burst_ready: bool,
    /// The over-threshold detector fired
    pub threshold: bool,
}

/// A FIFO-buffered accelerometer with an over-threshold detector.
pub trait MotionSensor {
    /// Bring the device to a known configuration and leave it disarmed.
    fn init(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    /// Start sampling and enable burst and threshold interrupts.
    fn arm(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    /// Stop sampling and mask all interrupts.
    fn disarm(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    /// Read one full FIFO.
    fn read_burst(&mut self, burst: &mut RawBurst) -> impl Future<Output = Result<(), SensorError>>;

    /// Empty the FIFO so the next overrun can be signalled.
    fn reset_buffer(&mut self) -> impl Future<Output = Result<(), SensorError>>;

    /// Raw threshold source register. Bit 6 is set while the event is active.
    fn threshold_source(&mut self) -> impl Future<Output = Result<u8, SensorError>>;

    /// Resolve which interrupt sources are pending.
    fn interrupt_sources(&mut self) -> impl Future<Output = Result<InterruptSources, SensorError>>;
}
