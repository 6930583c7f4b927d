//! Driver for the ST LIS3DH accelerometer over SPI.
//!
//! The sensor runs at 200 Hz in low-power mode with the FIFO in FIFO mode.
//! INT1 fires on FIFO overrun (a full 32-level burst) and on the XYZ high
//! event detector.

use embedded_hal_async::spi::{Operation, SpiDevice};
use log::{debug, error, info};

use super::{InterruptSources, MotionSensor, SensorError};
use crate::config::SensorConfig;
use crate::sampling::{BYTES_PER_LEVEL, FIFO_LEVELS, RawBurst};

pub const WHO_AM_I: u8 = 0x0F;
pub const CTRL_REG1: u8 = 0x20;
pub const CTRL_REG3: u8 = 0x22;
pub const CTRL_REG4: u8 = 0x23;
pub const CTRL_REG5: u8 = 0x24;
pub const OUT_X_L: u8 = 0x28;
pub const FIFO_CTRL_REG: u8 = 0x2E;
pub const FIFO_SRC_REG: u8 = 0x2F;
pub const INT1_CFG: u8 = 0x30;
pub const INT1_SRC: u8 = 0x31;
pub const INT1_THS: u8 = 0x32;
pub const INT1_DURATION: u8 = 0x33;

/// Set on the command byte for reads
pub const READ_BIT: u8 = 0x80;
/// Set on the command byte to auto-increment the register address
pub const MULTI_BIT: u8 = 0x40;

pub const DEVICE_ID: u8 = 0x33;

/// 200 Hz, low-power, all axes off
pub const CTRL_REG1_STOP: u8 = 0x68;
/// 200 Hz, low-power, X/Y/Z on
pub const CTRL_REG1_START: u8 = 0x6F;
/// IA1 and FIFO overrun routed to INT1
pub const CTRL_REG3_IA1_OVERRUN: u8 = 0x42;
pub const CTRL_REG3_NONE: u8 = 0x00;
/// Block data update
pub const CTRL_REG4_BDU: u8 = 0x80;
pub const CTRL_REG5_FIFO_ENABLE: u8 = 0x40;
pub const CTRL_REG5_FIFO_DISABLE: u8 = 0x00;
pub const FIFO_MODE_BYPASS: u8 = 0x00;
pub const FIFO_MODE_FIFO: u8 = 0x40;
pub const FIFO_SRC_OVRN: u8 = 0x40;
pub const INT1_CFG_NONE: u8 = 0x00;
/// OR combination of X/Y/Z high events
pub const INT1_CFG_XYZ_HIGH: u8 = 0x2A;
pub const INT1_SRC_IA: u8 = 0x40;

pub struct Lis3dh<S> {
    spi: S,
    config: SensorConfig,
}

impl<S: SpiDevice> Lis3dh<S> {
    pub fn new(spi: S, config: SensorConfig) -> Self {
        Self { spi, config }
    }

    pub fn device(&self) -> &S {
        &self.spi
    }

    pub fn device_mut(&mut self) -> &mut S {
        &mut self.spi
    }

    pub fn release(self) -> S {
        self.spi
    }

    pub async fn read_register(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut value = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&[register | READ_BIT]),
                Operation::Read(&mut value),
            ])
            .await
            .map_err(|e| {
                error!("LIS3DH: read of {:#04x} failed", register);
                SensorError::ReadFailed {
                    register,
                    kind: embedded_hal::spi::Error::kind(&e),
                }
            })?;
        Ok(value[0])
    }

    pub async fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.spi.write(&[register, value]).await.map_err(|e| {
            error!("LIS3DH: write of {:#04x} to {:#04x} failed", value, register);
            SensorError::WriteFailed {
                register,
                kind: embedded_hal::spi::Error::kind(&e),
            }
        })
    }

    async fn write_all(&mut self, writes: &[(u8, u8)]) -> Result<(), SensorError> {
        for &(register, value) in writes {
            self.write_register(register, value).await?;
        }
        Ok(())
    }
}

impl<S: SpiDevice> MotionSensor for Lis3dh<S> {
    async fn init(&mut self) -> Result<(), SensorError> {
        let found = self.read_register(WHO_AM_I).await?;
        if found != DEVICE_ID {
            error!("LIS3DH: WHO_AM_I returned {:#04x}", found);
            return Err(SensorError::IdentityMismatch { found });
        }

        self.write_all(&[
            (CTRL_REG1, CTRL_REG1_STOP),
            (CTRL_REG3, CTRL_REG3_NONE),
            (CTRL_REG4, CTRL_REG4_BDU),
            (CTRL_REG5, CTRL_REG5_FIFO_ENABLE),
            (FIFO_CTRL_REG, FIFO_MODE_BYPASS),
            (INT1_CFG, INT1_CFG_NONE),
            (INT1_THS, self.config.threshold),
            (INT1_DURATION, self.config.duration),
        ])
        .await?;

        self.disarm().await?;
        info!(
            "LIS3DH: configured (threshold {:#04x}, duration {:#04x})",
            self.config.threshold, self.config.duration
        );
        Ok(())
    }

    async fn arm(&mut self) -> Result<(), SensorError> {
        self.write_all(&[
            (CTRL_REG1, CTRL_REG1_START),
            (CTRL_REG3, CTRL_REG3_IA1_OVERRUN),
            (CTRL_REG5, CTRL_REG5_FIFO_ENABLE),
            (FIFO_CTRL_REG, FIFO_MODE_FIFO),
            (INT1_CFG, INT1_CFG_XYZ_HIGH),
        ])
        .await?;
        debug!("LIS3DH: armed");
        Ok(())
    }

    async fn disarm(&mut self) -> Result<(), SensorError> {
        self.write_all(&[
            (CTRL_REG1, CTRL_REG1_STOP),
            (CTRL_REG3, CTRL_REG3_NONE),
            (CTRL_REG5, CTRL_REG5_FIFO_DISABLE),
            (FIFO_CTRL_REG, FIFO_MODE_BYPASS),
            (INT1_CFG, INT1_CFG_NONE),
        ])
        .await?;
        debug!("LIS3DH: disarmed");
        Ok(())
    }

    async fn read_burst(&mut self, burst: &mut RawBurst) -> Result<(), SensorError> {
        // One transaction per level; the address wraps back to OUT_X_L.
        for level in burst.chunks_exact_mut(BYTES_PER_LEVEL).take(FIFO_LEVELS) {
            self.spi
                .transaction(&mut [
                    Operation::Write(&[OUT_X_L | READ_BIT | MULTI_BIT]),
                    Operation::Read(level),
                ])
                .await
                .map_err(|e| SensorError::ReadFailed {
                    register: OUT_X_L,
                    kind: embedded_hal::spi::Error::kind(&e),
                })?;
        }
        Ok(())
    }

    async fn reset_buffer(&mut self) -> Result<(), SensorError> {
        self.write_register(FIFO_CTRL_REG, FIFO_MODE_BYPASS).await?;
        self.write_register(FIFO_CTRL_REG, FIFO_MODE_FIFO).await
    }

    async fn threshold_source(&mut self) -> Result<u8, SensorError> {
        self.read_register(INT1_SRC).await
    }

    async fn interrupt_sources(&mut self) -> Result<InterruptSources, SensorError> {
        let fifo = self.read_register(FIFO_SRC_REG).await?;
        let int1 = self.read_register(INT1_SRC).await?;
        Ok(InterruptSources {
            burst_ready: fifo & FIFO_SRC_OVRN != 0,
            threshold: int1 & INT1_SRC_IA != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::RAW_BURST_BYTES;
    use crate::sim::EmulatedLis3dh;
    use embassy_futures::block_on;

    fn sensor() -> Lis3dh<EmulatedLis3dh> {
        Lis3dh::new(EmulatedLis3dh::new(), SensorConfig::default())
    }

    #[test]
    fn init_configures_and_leaves_disarmed() {
        let mut lis = sensor();
        block_on(lis.init()).unwrap();

        let device = lis.device();
        assert_eq!(device.register(CTRL_REG1), CTRL_REG1_STOP);
        assert_eq!(device.register(CTRL_REG4), CTRL_REG4_BDU);
        assert_eq!(device.register(INT1_THS), 0x64);
        assert_eq!(device.register(INT1_DURATION), 0x14);
        assert_eq!(device.register(INT1_CFG), INT1_CFG_NONE);
    }

    #[test]
    fn init_rejects_another_part() {
        let mut lis = sensor();
        lis.device_mut().set_identity(0x44);
        assert_eq!(
            block_on(lis.init()),
            Err(SensorError::IdentityMismatch { found: 0x44 })
        );
    }

    #[test]
    fn arm_enables_fifo_and_detector() {
        let mut lis = sensor();
        block_on(async {
            lis.init().await.unwrap();
            lis.arm().await.unwrap();
        });

        let device = lis.device();
        assert_eq!(device.register(CTRL_REG1), CTRL_REG1_START);
        assert_eq!(device.register(CTRL_REG3), CTRL_REG3_IA1_OVERRUN);
        assert_eq!(device.register(FIFO_CTRL_REG), FIFO_MODE_FIFO);
        assert_eq!(device.register(INT1_CFG), INT1_CFG_XYZ_HIGH);
    }

    #[test]
    fn burst_is_read_level_by_level() {
        let mut lis = sensor();
        let loaded: RawBurst = core::array::from_fn(|i| i as u8);
        lis.device_mut().load_burst(&loaded);

        block_on(async {
            assert_eq!(
                lis.interrupt_sources().await.unwrap(),
                InterruptSources {
                    burst_ready: true,
                    threshold: false
                }
            );

            let mut burst = [0u8; RAW_BURST_BYTES];
            lis.read_burst(&mut burst).await.unwrap();
            assert_eq!(burst, loaded);
            assert!(!lis.interrupt_sources().await.unwrap().burst_ready);
        });
    }

    #[test]
    fn reset_discards_pending_levels() {
        let mut lis = sensor();
        lis.device_mut().load_burst(&[1; RAW_BURST_BYTES]);

        block_on(lis.reset_buffer()).unwrap();
        assert_eq!(lis.device().fifo_len(), 0);
        assert_eq!(lis.device().register(FIFO_CTRL_REG), FIFO_MODE_FIFO);
    }

    #[test]
    fn threshold_source_reports_activity() {
        let mut lis = sensor();
        lis.device_mut().trigger_threshold(0x02, 2);

        block_on(async {
            assert!(lis.interrupt_sources().await.unwrap().threshold);
            assert_eq!(lis.threshold_source().await.unwrap(), 0x42);
            assert_eq!(lis.threshold_source().await.unwrap(), 0x00);
        });
    }
}
