use heapless::Deque;
use log::warn;

use super::{HISTORY_BYTES, QUEUE_DEPTH, REDUCED_BURST_BYTES, ReducedBurst};
use crate::storage::{PAGES_PER_EVENT, PAYLOAD_SIZE};

/// Sliding history of the last [`QUEUE_DEPTH`] downsampled bursts.
///
/// New bursts enter at the front and the oldest one falls off the back once
/// the ring is full. Slots that have not been filled since boot read as
/// zeros, at the old end of the history.
#[derive(Debug, Clone)]
pub struct SampleQueue {
    bursts: Deque<ReducedBurst, QUEUE_DEPTH>,
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleQueue {
    pub const fn new() -> Self {
        Self {
            bursts: Deque::new(),
        }
    }

    /// Insert a burst as the newest entry, evicting the oldest when full.
    pub fn push(&mut self, burst: ReducedBurst) {
        if self.bursts.is_full() {
            self.bursts.pop_back();
        }
        if self.bursts.push_front(burst).is_err() {
            warn!("Sample history refused a burst");
        }
    }

    /// Bursts captured since boot, capped at [`QUEUE_DEPTH`]
    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }

    /// Bursts from newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = &ReducedBurst> {
        self.bursts.iter()
    }

    /// The whole history in capture order, oldest byte first.
    pub fn history(&self) -> [u8; HISTORY_BYTES] {
        let mut history = [0u8; HISTORY_BYTES];
        let unfilled = QUEUE_DEPTH - self.bursts.len();

        for (slot, burst) in self.bursts.iter().rev().enumerate() {
            let offset = (unfilled + slot) * REDUCED_BURST_BYTES;
            history[offset..offset + REDUCED_BURST_BYTES].copy_from_slice(burst.as_bytes());
        }

        history
    }

    /// Payload for page `page_index` of an event, or `None` past the last
    /// page.
    ///
    /// Pages walk the history from oldest to newest. The last page carries
    /// the newest burst followed by zero padding.
    pub fn extract_payload(&self, page_index: usize) -> Option<[u8; PAYLOAD_SIZE]> {
        if page_index >= PAGES_PER_EVENT {
            return None;
        }

        Some(payload_at(&self.history(), page_index))
    }

    /// All payloads of an event at once.
    pub fn payloads(&self) -> [[u8; PAYLOAD_SIZE]; PAGES_PER_EVENT] {
        let history = self.history();
        core::array::from_fn(|page| payload_at(&history, page))
    }
}

/// Page-sized window of `history`, zero padded past its end.
fn payload_at(history: &[u8; HISTORY_BYTES], page_index: usize) -> [u8; PAYLOAD_SIZE] {
    let start = page_index * PAYLOAD_SIZE;
    let end = (start + PAYLOAD_SIZE).min(HISTORY_BYTES);

    let mut payload = [0u8; PAYLOAD_SIZE];
    payload[..end - start].copy_from_slice(&history[start..end]);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EVENT_PADDING;

    fn burst(tag: u8) -> ReducedBurst {
        ReducedBurst([tag; REDUCED_BURST_BYTES])
    }

    #[test]
    fn starts_zeroed() {
        let queue = SampleQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.history(), [0; HISTORY_BYTES]);
    }

    #[test]
    fn partial_fill_is_zero_padded_at_the_old_end() {
        let mut queue = SampleQueue::new();
        queue.push(burst(1));
        queue.push(burst(2));

        let history = queue.history();
        let split = HISTORY_BYTES - 2 * REDUCED_BURST_BYTES;
        assert!(history[..split].iter().all(|&b| b == 0));
        assert!(history[split..split + REDUCED_BURST_BYTES].iter().all(|&b| b == 1));
        assert!(history[split + REDUCED_BURST_BYTES..].iter().all(|&b| b == 2));
    }

    #[test]
    fn seventh_push_evicts_the_oldest() {
        let mut queue = SampleQueue::new();
        for tag in 1..=7 {
            queue.push(burst(tag));
        }

        assert_eq!(queue.len(), QUEUE_DEPTH);
        let newest_first: Vec<u8> = queue.iter().map(|b| b.0[0]).collect();
        assert_eq!(newest_first, [7, 6, 5, 4, 3, 2]);

        let history = queue.history();
        for (slot, tag) in (2..=7).enumerate() {
            let chunk = &history[slot * REDUCED_BURST_BYTES..(slot + 1) * REDUCED_BURST_BYTES];
            assert!(chunk.iter().all(|&b| b == tag));
        }
    }

    #[test]
    fn long_runs_keep_the_newest_bursts() {
        let mut queue = SampleQueue::new();
        for tag in 0..40u8 {
            queue.push(burst(tag));
        }

        assert_eq!(queue.len(), QUEUE_DEPTH);
        let newest_first: Vec<u8> = queue.iter().map(|b| b.0[0]).collect();
        assert_eq!(newest_first, [39, 38, 37, 36, 35, 34]);
    }

    #[test]
    fn last_payload_is_newest_burst_plus_padding() {
        let mut queue = SampleQueue::new();
        for tag in 1..=7 {
            queue.push(burst(tag));
        }

        let last = queue.extract_payload(PAGES_PER_EVENT - 1).unwrap();
        let data = PAYLOAD_SIZE - EVENT_PADDING;
        assert!(last[..data].iter().all(|&b| b == 7));
        assert_eq!(&last[data..], &[0; EVENT_PADDING]);
    }

    #[test]
    fn payloads_tile_the_history() {
        let mut queue = SampleQueue::new();
        for tag in 10u8..16 {
            let mut bytes = [0u8; REDUCED_BURST_BYTES];
            for (i, byte) in bytes.iter_mut().enumerate() {
                *byte = tag.wrapping_mul(3).wrapping_add(i as u8);
            }
            queue.push(ReducedBurst(bytes));
        }

        let history = queue.history();
        let mut joined = Vec::new();
        for page in 0..PAGES_PER_EVENT {
            let payload = queue.extract_payload(page).unwrap();
            assert_eq!(payload, queue.payloads()[page]);
            joined.extend_from_slice(&payload);
        }

        assert_eq!(&joined[..HISTORY_BYTES], &history[..]);
        assert!(joined[HISTORY_BYTES..].iter().all(|&b| b == 0));
        // The first page starts with the oldest retained burst.
        assert_eq!(queue.extract_payload(0).unwrap()[0], 10 * 3);
    }

    #[test]
    fn page_index_past_the_event_is_rejected() {
        assert_eq!(SampleQueue::new().extract_payload(PAGES_PER_EVENT), None);
    }
}
