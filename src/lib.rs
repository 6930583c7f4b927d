//! Hardware-independent core of the shock logger
//!
//! Captures LIS3DH accelerometer bursts into a short downsampled history and,
//! when the over-threshold detector fires, persists that history as an event
//! record on a 25LC256 SPI EEPROM. Stored events are served over a serial
//! link by a small remote command set.
//!
//! It is `no_std` with `extern crate alloc` so it compiles on both embedded
//! targets and desktop hosts (for the simulator and tests). Hardware is only
//! reached through `embedded-hal-async` and `embedded-io-async` traits.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod command;
pub mod config;
pub mod pipeline;
pub mod sampling;
pub mod sensors;
pub mod storage;
pub mod telemetry;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::Config;
pub use pipeline::{CapturePipeline, CaptureState, EventSignals, PipelineEvent};
