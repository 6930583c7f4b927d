//! Emulated peripherals for host runs and tests.
//!
//! Each emulator implements the same HAL trait the real part is driven
//! through, so the production drivers run unchanged on top of them.

mod eeprom;
mod lis3dh;
mod serial;

pub use eeprom::EmulatedEeprom;
pub use lis3dh::EmulatedLis3dh;
pub use serial::SerialLink;

use embedded_hal_async::delay::DelayNs;

use crate::config::StoreConfig;
use crate::pipeline::Uptime;
use crate::storage::Eeprom25lc256;

/// Delay provider that returns immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Uptime that only moves when told to
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualClock {
    secs: u16,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, secs: u16) {
        self.secs = secs;
    }

    pub fn advance(&mut self, secs: u16) {
        self.secs = self.secs.wrapping_add(secs);
    }
}

impl Uptime for ManualClock {
    fn uptime_secs(&self) -> u16 {
        self.secs
    }
}

/// EEPROM driver on a fresh emulated device with default polling.
pub fn emulated_store() -> Eeprom25lc256<EmulatedEeprom, NoopDelay> {
    Eeprom25lc256::new(EmulatedEeprom::new(), NoopDelay, StoreConfig::default())
}
