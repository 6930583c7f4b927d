//! Capture pipeline: the single consumer of interrupt events.
//!
//! All storage and sensor I/O happens here, in event order. Interrupt
//! handlers only call [`EventSignals::raise`].

mod events;

pub use events::*;

use embedded_io_async::Write;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::command::{self, CommandError};
use crate::config::PipelineConfig;
use crate::sampling::{RAW_BURST_BYTES, RawBurst, SampleQueue, downsample};
use crate::sensors::lis3dh::INT1_SRC_IA;
use crate::sensors::{MotionSensor, SensorError};
use crate::storage::{
    CatalogError, ControlFlag, ControlRegisterStore, EventCatalog, PagedStore, StoreError,
};
use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Sensor disarmed, nothing captured
    Idle,
    /// Sensor armed, bursts and events are captured
    Sensing,
    /// Sensor disarmed while the transmit choice is made
    Configuring,
}

/// Seconds since boot
pub trait Uptime {
    /// Wraps after `u16::MAX` seconds.
    fn uptime_secs(&self) -> u16;
}

/// Uptime from the embassy time driver
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyUptime;

impl Uptime for EmbassyUptime {
    fn uptime_secs(&self) -> u16 {
        embassy_time::Instant::now().as_secs() as u16
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("sensor: {0}")]
    Sensor(SensorError),
    #[error("catalog: {0}")]
    Catalog(CatalogError),
    #[error("command: {0}")]
    Command(CommandError),
    #[error("telemetry link failed: {0:?}")]
    Link(embedded_io::ErrorKind),
}

impl From<SensorError> for PipelineError {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<CatalogError> for PipelineError {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::Catalog(CatalogError::Store(e))
    }
}

impl From<CommandError> for PipelineError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

/// Owns every piece of mutable capture state.
pub struct CapturePipeline<P, M, W, U> {
    catalog: EventCatalog<P>,
    sensor: M,
    link: W,
    clock: U,
    queue: SampleQueue,
    burst: RawBurst,
    state: CaptureState,
    send_choice: bool,
    config: PipelineConfig,
}

impl<P, M, W, U> CapturePipeline<P, M, W, U>
where
    P: PagedStore,
    M: MotionSensor,
    W: Write,
    U: Uptime,
{
    pub fn new(store: P, sensor: M, link: W, clock: U, config: PipelineConfig) -> Self {
        Self {
            catalog: EventCatalog::new(store),
            sensor,
            link,
            clock,
            queue: SampleQueue::new(),
            burst: [0; RAW_BURST_BYTES],
            state: CaptureState::Idle,
            send_choice: false,
            config,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn queue(&self) -> &SampleQueue {
        &self.queue
    }

    /// Transmit choice that will be persisted when configuration ends
    pub fn send_choice(&self) -> bool {
        self.send_choice
    }

    pub fn catalog_mut(&mut self) -> &mut EventCatalog<P> {
        &mut self.catalog
    }

    pub fn sensor_mut(&mut self) -> &mut M {
        &mut self.sensor
    }

    pub fn link_mut(&mut self) -> &mut W {
        &mut self.link
    }

    pub fn clock_mut(&mut self) -> &mut U {
        &mut self.clock
    }

    /// Boot sequence. Must run once before the first event is handled.
    ///
    /// Leaves the sensor disarmed and the pipeline idle, whatever state was
    /// persisted before the restart.
    pub async fn init(&mut self) -> Result<(), PipelineError> {
        self.sensor.init().await?;
        self.state = CaptureState::Idle;

        let store = self.catalog.store_mut();
        store.set_flag(ControlFlag::StartStop, false).await?;
        if store.flag(ControlFlag::ConfigMode).await? {
            warn!("Clearing configuration mode left over from before reset");
            store.set_flag(ControlFlag::ConfigMode, false).await?;
        }
        self.send_choice = store.flag(ControlFlag::SendEnabled).await?;

        let events = self.catalog.event_count().await?;
        info!(
            "Pipeline ready: {} events stored, transmit {}",
            events,
            if self.send_choice { "on" } else { "off" }
        );
        Ok(())
    }

    pub async fn toggle_start_stop(&mut self) -> Result<(), PipelineError> {
        match self.state {
            CaptureState::Idle => {
                self.sensor.arm().await?;
                self.catalog
                    .store_mut()
                    .set_flag(ControlFlag::StartStop, true)
                    .await?;
                self.state = CaptureState::Sensing;
                info!("Sensing started");
            }
            CaptureState::Sensing => {
                self.sensor.disarm().await?;
                self.catalog
                    .store_mut()
                    .set_flag(ControlFlag::StartStop, false)
                    .await?;
                self.state = CaptureState::Idle;
                info!("Sensing stopped");
            }
            CaptureState::Configuring => debug!("Start/stop ignored while configuring"),
        }
        Ok(())
    }

    pub async fn toggle_config(&mut self) -> Result<(), PipelineError> {
        if self.state != CaptureState::Configuring {
            if self.state == CaptureState::Sensing {
                self.sensor.disarm().await?;
            }
            self.state = CaptureState::Configuring;
            self.catalog
                .store_mut()
                .set_flag(ControlFlag::ConfigMode, true)
                .await?;
            info!("Entered configuration mode");
            return Ok(());
        }

        let store = self.catalog.store_mut();
        let resume_sensing = store.flag(ControlFlag::StartStop).await?;
        store.set_flag(ControlFlag::ConfigMode, false).await?;

        if resume_sensing {
            self.sensor.arm().await?;
            self.state = CaptureState::Sensing;
        } else {
            self.state = CaptureState::Idle;
        }

        self.catalog
            .store_mut()
            .set_flag(ControlFlag::SendEnabled, self.send_choice)
            .await?;
        info!(
            "Left configuration mode ({:?}, transmit {})",
            self.state,
            if self.send_choice { "on" } else { "off" }
        );
        Ok(())
    }

    /// Record the transmit choice. Persisted when configuration ends.
    pub fn set_send_enabled(&mut self, enabled: bool) {
        if self.state != CaptureState::Configuring {
            debug!("Transmit choice changed outside configuration mode");
        }
        self.send_choice = enabled;
    }

    /// Queue the burst, forward it when enabled, then re-arm the FIFO. The
    /// FIFO is re-armed even when forwarding fails.
    pub async fn on_burst_ready(&mut self) -> Result<(), PipelineError> {
        self.sensor.read_burst(&mut self.burst).await?;
        self.queue.push(downsample(&self.burst));

        let forwarded = self.forward_burst().await;
        self.sensor.reset_buffer().await?;
        forwarded
    }

    async fn forward_burst(&mut self) -> Result<(), PipelineError> {
        if self
            .catalog
            .store_mut()
            .flag(ControlFlag::SendEnabled)
            .await?
        {
            telemetry::send_burst(&mut self.link, &self.burst)
                .await
                .map_err(|e| PipelineError::Link(embedded_io::Error::kind(&e)))?;
        }
        Ok(())
    }

    /// Store an event from the current history.
    ///
    /// The drain budget counts INT1_SRC reads, back to back, not time.
    pub async fn on_threshold(&mut self) -> Result<(), PipelineError> {
        let id = self.catalog.event_count().await?;
        let status = self.sensor.threshold_source().await?;
        let timestamp = self.clock.uptime_secs();

        let mut drained = false;
        for _ in 0..self.config.max_drain_polls {
            if self.sensor.threshold_source().await? & INT1_SRC_IA == 0 {
                drained = true;
                break;
            }
        }
        if !drained {
            warn!(
                "Threshold still active after {} polls",
                self.config.max_drain_polls
            );
        }

        let stored = self
            .catalog
            .append_event(id, status, timestamp, &self.queue)
            .await;
        self.sensor.reset_buffer().await?;
        stored?;
        Ok(())
    }

    /// Resolve a combined sensor interrupt. Burst work runs first; a
    /// failed burst does not stop the threshold work. Reports the first
    /// error.
    pub async fn on_sensor_interrupt(&mut self) -> Result<(), PipelineError> {
        let sources = self.sensor.interrupt_sources().await?;
        let burst = if sources.burst_ready {
            self.on_burst_ready().await
        } else {
            Ok(())
        };
        let threshold = if sources.threshold {
            self.on_threshold().await
        } else {
            Ok(())
        };

        if let (Err(_), Err(e)) = (&burst, &threshold) {
            error!("Threshold handling failed as well: {}", e);
        }
        burst.and(threshold)
    }

    pub async fn handle(&mut self, event: PipelineEvent) -> Result<(), PipelineError> {
        match event {
            PipelineEvent::BurstReady
            | PipelineEvent::ThresholdExceeded
            | PipelineEvent::SensorInterrupt
                if self.state != CaptureState::Sensing =>
            {
                debug!("{:?} dropped while {:?}", event, self.state);
                Ok(())
            }
            PipelineEvent::BurstReady => self.on_burst_ready().await,
            PipelineEvent::ThresholdExceeded => self.on_threshold().await,
            PipelineEvent::SensorInterrupt => self.on_sensor_interrupt().await,
            PipelineEvent::StartStopPressed => self.toggle_start_stop().await,
            PipelineEvent::ConfigPressed => self.toggle_config().await,
            PipelineEvent::Remote(remote) => {
                command::execute(remote, &mut self.catalog, &mut self.link).await?;
                Ok(())
            }
        }
    }

    /// Handle one event from `signals`, logging any failure.
    pub async fn process_next(&mut self, signals: &EventSignals) {
        let event = signals.next().await;
        if let Err(e) = self.handle(event).await {
            error!("Handling {:?} failed: {}", event, e);
        }
        signals.complete(event);
    }

    /// Consume events forever.
    pub async fn run(&mut self, signals: &EventSignals) {
        loop {
            self.process_next(signals).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ACK, Command};
    use crate::config::SensorConfig;
    use crate::sampling::{BYTES_PER_LEVEL, FIFO_LEVELS};
    use crate::sensors::Lis3dh;
    use crate::sensors::lis3dh::{CTRL_REG1, CTRL_REG1_START, CTRL_REG1_STOP, FIFO_MODE_FIFO};
    use crate::sim::{
        EmulatedEeprom, EmulatedLis3dh, ManualClock, NoopDelay, SerialLink, emulated_store,
    };
    use crate::storage::{
        CONTROL_REGISTER_ADDR, Eeprom25lc256, LOG_DATA_BASE_ADDR, PAGE_SIZE, PAGES_PER_EVENT,
    };
    use crate::sensors::lis3dh::{FIFO_CTRL_REG, FIFO_MODE_BYPASS};
    use crate::telemetry::FRAME_SIZE;
    use embassy_futures::block_on;
    use embedded_io::ErrorKind;
    use embedded_io_async::ErrorType;

    /// Link whose every write fails.
    struct BrokenLink;

    impl ErrorType for BrokenLink {
        type Error = ErrorKind;
    }

    impl Write for BrokenLink {
        async fn write(&mut self, _buf: &[u8]) -> Result<usize, ErrorKind> {
            Err(ErrorKind::BrokenPipe)
        }

        async fn flush(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }
    }

    type TestPipeline = CapturePipeline<
        Eeprom25lc256<EmulatedEeprom, NoopDelay>,
        Lis3dh<EmulatedLis3dh>,
        SerialLink,
        ManualClock,
    >;

    fn pipeline() -> TestPipeline {
        CapturePipeline::new(
            emulated_store(),
            Lis3dh::new(EmulatedLis3dh::new(), SensorConfig::default()),
            SerialLink::new(),
            ManualClock::new(),
            PipelineConfig::default(),
        )
    }

    fn booted() -> TestPipeline {
        let mut pipeline = pipeline();
        block_on(async {
            pipeline.catalog_mut().erase_all().await.unwrap();
            pipeline.init().await.unwrap();
        });
        pipeline
    }

    /// Every level of burst `n` carries high bytes `n, n + 1, n + 2`.
    fn known_burst(n: u8) -> RawBurst {
        let mut raw = [0u8; RAW_BURST_BYTES];
        for level in raw.chunks_exact_mut(BYTES_PER_LEVEL) {
            level.copy_from_slice(&[0, n, 0, n + 1, 0, n + 2]);
        }
        raw
    }

    fn control_byte(pipeline: &mut TestPipeline) -> u8 {
        block_on(
            pipeline
                .catalog_mut()
                .store_mut()
                .read_byte(CONTROL_REGISTER_ADDR),
        )
        .unwrap()
    }

    #[test]
    fn boot_reconciles_persisted_flags() {
        let mut pipeline = pipeline();
        block_on(async {
            let store = pipeline.catalog_mut().store_mut();
            store.write_byte(CONTROL_REGISTER_ADDR, 0b0111).await.unwrap();
            store.wait_for_completion().await.unwrap();

            pipeline.init().await.unwrap();
        });

        assert_eq!(pipeline.state(), CaptureState::Idle);
        assert!(pipeline.send_choice());
        assert_eq!(control_byte(&mut pipeline), 0b0100);
        assert_eq!(
            pipeline.sensor_mut().device().register(CTRL_REG1),
            CTRL_REG1_STOP
        );
    }

    #[test]
    fn start_stop_arms_and_persists() {
        let mut pipeline = booted();

        block_on(pipeline.handle(PipelineEvent::StartStopPressed)).unwrap();
        assert_eq!(pipeline.state(), CaptureState::Sensing);
        assert_eq!(control_byte(&mut pipeline), 0b0001);
        assert_eq!(
            pipeline.sensor_mut().device().register(CTRL_REG1),
            CTRL_REG1_START
        );

        block_on(pipeline.handle(PipelineEvent::StartStopPressed)).unwrap();
        assert_eq!(pipeline.state(), CaptureState::Idle);
        assert_eq!(control_byte(&mut pipeline), 0b0000);
    }

    #[test]
    fn configuration_round_trip_resumes_sensing() {
        let mut pipeline = booted();

        block_on(async {
            pipeline.toggle_start_stop().await.unwrap();
            pipeline.toggle_config().await.unwrap();
        });
        assert_eq!(pipeline.state(), CaptureState::Configuring);
        assert_eq!(control_byte(&mut pipeline), 0b0011);
        assert_eq!(
            pipeline.sensor_mut().device().register(CTRL_REG1),
            CTRL_REG1_STOP
        );

        // Start/stop is ignored while configuring.
        block_on(pipeline.toggle_start_stop()).unwrap();
        assert_eq!(pipeline.state(), CaptureState::Configuring);

        pipeline.set_send_enabled(true);
        block_on(pipeline.toggle_config()).unwrap();
        assert_eq!(pipeline.state(), CaptureState::Sensing);
        assert_eq!(control_byte(&mut pipeline), 0b0101);
        assert_eq!(
            pipeline.sensor_mut().device().register(CTRL_REG1),
            CTRL_REG1_START
        );
    }

    #[test]
    fn configuration_from_idle_returns_to_idle() {
        let mut pipeline = booted();

        block_on(async {
            pipeline.toggle_config().await.unwrap();
            pipeline.toggle_config().await.unwrap();
        });
        assert_eq!(pipeline.state(), CaptureState::Idle);
        assert_eq!(control_byte(&mut pipeline), 0b0000);
    }

    #[test]
    fn bursts_are_forwarded_only_when_enabled() {
        let mut pipeline = booted();

        block_on(async {
            pipeline.toggle_start_stop().await.unwrap();
            pipeline.sensor_mut().device_mut().load_burst(&known_burst(1));
            pipeline.handle(PipelineEvent::BurstReady).await.unwrap();
        });
        assert!(pipeline.link_mut().tx().is_empty());
        assert_eq!(pipeline.queue().len(), 1);

        block_on(async {
            pipeline.toggle_config().await.unwrap();
            pipeline.set_send_enabled(true);
            pipeline.toggle_config().await.unwrap();
            pipeline.sensor_mut().device_mut().load_burst(&known_burst(4));
            pipeline.handle(PipelineEvent::BurstReady).await.unwrap();
        });

        let sent = pipeline.link_mut().take_tx();
        assert_eq!(sent.len(), FIFO_LEVELS * FRAME_SIZE);
        assert_eq!(&sent[..FRAME_SIZE], &[0xA0, 4, 5, 6, 0xC0]);

        let device = pipeline.sensor_mut().device();
        assert_eq!(device.fifo_len(), 0);
        assert_eq!(device.register(crate::sensors::lis3dh::FIFO_CTRL_REG), FIFO_MODE_FIFO);
    }

    #[test]
    fn threshold_event_is_stored_with_history() {
        let mut pipeline = booted();
        pipeline.clock_mut().set(100);

        let mut expected = SampleQueue::new();
        block_on(async {
            pipeline.toggle_start_stop().await.unwrap();
            for n in 0..6u8 {
                let burst = known_burst(n * 10);
                expected.push(downsample(&burst));
                pipeline.sensor_mut().device_mut().load_burst(&burst);
                pipeline.handle(PipelineEvent::BurstReady).await.unwrap();
            }

            pipeline.sensor_mut().device_mut().trigger_threshold(0x02, 3);
            pipeline.handle(PipelineEvent::ThresholdExceeded).await.unwrap();
        });

        block_on(async {
            let catalog = pipeline.catalog_mut();
            assert_eq!(catalog.find_event_address(0).await.unwrap(), LOG_DATA_BASE_ADDR);
            assert_eq!(catalog.event_count().await.unwrap(), 1);

            for (index, payload) in expected.payloads().iter().enumerate() {
                let addr = LOG_DATA_BASE_ADDR + (index * PAGE_SIZE) as u16;
                let mut bytes = [0u8; PAGE_SIZE];
                catalog.store_mut().read_page(addr, &mut bytes).await.unwrap();
                assert_eq!(&bytes[..4], &[0, 0x42, 0x64, 0x00]);
                assert_eq!(&bytes[4..], &payload[..]);
            }
        });

        // The last payload holds the newest burst, then padding.
        let last = expected.payloads()[PAGES_PER_EVENT - 1];
        assert_eq!(&last[..3], &[50, 51, 52]);
        assert_eq!(&last[48..], &[0; 12]);
    }

    #[test]
    fn combined_interrupt_runs_burst_then_threshold() {
        let mut pipeline = booted();

        block_on(async {
            pipeline.toggle_start_stop().await.unwrap();
            pipeline.sensor_mut().device_mut().load_burst(&known_burst(7));
            pipeline.sensor_mut().device_mut().trigger_threshold(0x08, 3);
            pipeline.handle(PipelineEvent::SensorInterrupt).await.unwrap();

            let record = pipeline.catalog_mut().read_event(0).await.unwrap();
            assert_eq!(record.status(), 0x48);
            // The burst was queued before the event was written.
            let newest = record.pages[PAGES_PER_EVENT - 1].payload;
            assert_eq!(&newest[..3], &[7, 8, 9]);
        });
        assert_eq!(pipeline.queue().len(), 1);
    }

    #[test]
    fn link_failure_does_not_lose_the_shock() {
        let mut pipeline = CapturePipeline::new(
            emulated_store(),
            Lis3dh::new(EmulatedLis3dh::new(), SensorConfig::default()),
            BrokenLink,
            ManualClock::new(),
            PipelineConfig::default(),
        );

        let result = block_on(async {
            pipeline.catalog_mut().erase_all().await.unwrap();
            pipeline.init().await.unwrap();
            pipeline.toggle_start_stop().await.unwrap();
            pipeline.toggle_config().await.unwrap();
            pipeline.set_send_enabled(true);
            pipeline.toggle_config().await.unwrap();

            pipeline.sensor_mut().device_mut().load_burst(&known_burst(3));
            pipeline.sensor_mut().device_mut().trigger_threshold(0x02, 2);
            pipeline.handle(PipelineEvent::SensorInterrupt).await
        });

        assert_eq!(result, Err(PipelineError::Link(ErrorKind::BrokenPipe)));
        assert_eq!(pipeline.queue().len(), 1);
        assert_eq!(
            block_on(pipeline.catalog_mut().page_count()).unwrap(),
            PAGES_PER_EVENT as u16
        );
        let device = pipeline.sensor_mut().device();
        assert_eq!(device.fifo_len(), 0);
        assert_eq!(device.register(FIFO_CTRL_REG), FIFO_MODE_FIFO);
    }

    #[test]
    fn sensor_events_are_dropped_unless_sensing() {
        let mut pipeline = booted();

        block_on(async {
            pipeline.toggle_start_stop().await.unwrap();
            pipeline.toggle_start_stop().await.unwrap();

            pipeline.sensor_mut().device_mut().load_burst(&known_burst(2));
            pipeline.sensor_mut().device_mut().trigger_threshold(0x02, 2);
            for event in [
                PipelineEvent::BurstReady,
                PipelineEvent::ThresholdExceeded,
                PipelineEvent::SensorInterrupt,
            ] {
                pipeline.handle(event).await.unwrap();
            }

            pipeline.toggle_config().await.unwrap();
            pipeline.handle(PipelineEvent::ThresholdExceeded).await.unwrap();
        });

        assert_eq!(pipeline.state(), CaptureState::Configuring);
        assert!(pipeline.queue().is_empty());
        assert_eq!(block_on(pipeline.catalog_mut().page_count()).unwrap(), 0);
        assert_eq!(
            pipeline.sensor_mut().device().register(FIFO_CTRL_REG),
            FIFO_MODE_BYPASS
        );
    }

    #[test]
    fn drain_gives_up_after_the_read_budget() {
        let mut pipeline = CapturePipeline::new(
            emulated_store(),
            Lis3dh::new(EmulatedLis3dh::new(), SensorConfig::default()),
            SerialLink::new(),
            ManualClock::new(),
            PipelineConfig { max_drain_polls: 3 },
        );

        block_on(async {
            pipeline.catalog_mut().erase_all().await.unwrap();
            pipeline.init().await.unwrap();
            pipeline.toggle_start_stop().await.unwrap();
            pipeline.sensor_mut().device_mut().trigger_threshold(0x01, 10);
            pipeline.handle(PipelineEvent::ThresholdExceeded).await.unwrap();
        });

        // One read for the status, three for the drain.
        assert_eq!(pipeline.sensor_mut().device().threshold_reads_left(), 6);
        assert_eq!(
            block_on(pipeline.catalog_mut().read_event(0)).unwrap().status(),
            0x41
        );
    }

    #[test]
    fn full_log_keeps_the_pipeline_running() {
        let mut pipeline = booted();
        block_on(async {
            pipeline.toggle_start_stop().await.unwrap();
            let store = pipeline.catalog_mut().store_mut();
            store
                .write_page(crate::storage::PAGE_COUNTER_LOW_ADDR, &510u16.to_le_bytes())
                .await
                .unwrap();
            store.wait_for_completion().await.unwrap();
        });

        let signals = EventSignals::new();
        pipeline.sensor_mut().device_mut().trigger_threshold(0x02, 2);
        assert!(signals.raise(PipelineEvent::ThresholdExceeded));

        block_on(pipeline.process_next(&signals));
        assert!(!signals.is_pending(PipelineEvent::ThresholdExceeded));
        assert_eq!(block_on(pipeline.catalog_mut().page_count()).unwrap(), 510);
    }

    #[test]
    fn remote_commands_run_in_the_consumer() {
        let mut pipeline = booted();
        let signals = EventSignals::new();

        signals.raise(PipelineEvent::Remote(Command::EraseAll));
        signals.raise(PipelineEvent::Remote(Command::EventCount));
        signals.raise(PipelineEvent::Remote(Command::SendEvent(3)));
        for _ in 0..3 {
            block_on(pipeline.process_next(&signals));
        }

        assert_eq!(
            pipeline.link_mut().take_tx(),
            [ACK, 0, crate::command::NAK]
        );
    }
}
