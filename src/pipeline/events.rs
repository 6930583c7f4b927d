//! Typed events raised from interrupt context.

use core::cell::Cell;

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::command::Command;

/// Events waiting for the consumer
pub const EVENT_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// FIFO overrun: a full burst is waiting in the sensor
    BurstReady,
    /// The over-threshold detector fired
    ThresholdExceeded,
    /// INT1 fired and the source has not been resolved yet
    SensorInterrupt,
    StartStopPressed,
    ConfigPressed,
    Remote(Command),
}

impl PipelineEvent {
    /// Bit in the pending mask, for events that must not queue up twice
    const fn sticky_bit(&self) -> Option<u8> {
        match self {
            Self::BurstReady => Some(1 << 0),
            Self::ThresholdExceeded => Some(1 << 1),
            Self::SensorInterrupt => Some(1 << 2),
            _ => None,
        }
    }
}

/// Hand-off point between interrupt handlers and the capture pipeline.
///
/// Sensor events are sticky: raising one that is already pending is a
/// no-op until the consumer marks it complete. Other events queue normally.
pub struct EventSignals {
    pending: Mutex<Cell<u8>>,
    queue: Channel<CriticalSectionRawMutex, PipelineEvent, EVENT_QUEUE_DEPTH>,
}

impl Default for EventSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSignals {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(0)),
            queue: Channel::new(),
        }
    }

    /// Queue `event`. Safe to call from an interrupt handler.
    ///
    /// Returns `false` when the event was already pending or the queue is
    /// full.
    pub fn raise(&self, event: PipelineEvent) -> bool {
        critical_section::with(|cs| {
            let pending = self.pending.borrow(cs);
            let bit = event.sticky_bit();

            if let Some(bit) = bit {
                if pending.get() & bit != 0 {
                    return false;
                }
            }

            if self.queue.try_send(event).is_err() {
                warn!("Event queue full, dropping {:?}", event);
                return false;
            }

            if let Some(bit) = bit {
                pending.set(pending.get() | bit);
            }
            true
        })
    }

    /// Wait for the next event.
    pub async fn next(&self) -> PipelineEvent {
        self.queue.receive().await
    }

    pub fn try_next(&self) -> Option<PipelineEvent> {
        self.queue.try_receive().ok()
    }

    /// Mark the work for `event` done so it can be raised again.
    pub fn complete(&self, event: PipelineEvent) {
        if let Some(bit) = event.sticky_bit() {
            critical_section::with(|cs| {
                let pending = self.pending.borrow(cs);
                pending.set(pending.get() & !bit);
            });
        }
    }

    pub fn is_pending(&self, event: PipelineEvent) -> bool {
        match event.sticky_bit() {
            Some(bit) => critical_section::with(|cs| self.pending.borrow(cs).get() & bit != 0),
            None => false,
        }
    }
}
