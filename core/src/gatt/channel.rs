/// Outbound data channel for a single writable characteristic
///
/// Payloads are split into link-sized chunks and written one at a time. The
/// first chunk goes out immediately; each readiness signal from the adapter
/// releases the next one.

use super::service::CharacteristicInfo;
use crate::adapter::{CentralAdapter, PeripheralId, WriteType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Maximum characteristic value size (ATT protocol limitation)
pub const MAX_CHARACTERISTIC_SIZE: usize = 512;

/// Chunk length used when the adapter reports no usable write length
pub const DEFAULT_FALLBACK_WRITE_LENGTH: usize = 20;

/// Channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChannelState {
    /// Nothing in flight
    Idle,
    /// A chunk is in flight; further chunks wait for readiness
    Draining,
}

/// Splits payloads into characteristic-sized writes
pub struct Fragmenter;

impl Fragmenter {
    /// Split `data` into chunks of at most `chunk_len` bytes
    pub fn fragment(data: &[u8], chunk_len: usize) -> Vec<Vec<u8>> {
        let chunk_len = chunk_len.clamp(1, MAX_CHARACTERISTIC_SIZE);
        data.chunks(chunk_len).map(<[u8]>::to_vec).collect()
    }
}

/// Queue of pending chunks for one characteristic
#[derive(Debug)]
pub struct SendDataChannel {
    peripheral: PeripheralId,
    characteristic: String,
    write_type: WriteType,
    fallback_write_length: usize,
    state: DataChannelState,
    queue: VecDeque<Vec<u8>>,
}

impl SendDataChannel {
    /// Channel for `info`, or `None` when it does not accept writes
    pub fn new(
        peripheral: PeripheralId,
        info: &CharacteristicInfo,
        fallback_write_length: usize,
    ) -> Option<Self> {
        let write_type = info.write_behavior().write_type()?;
        Some(Self {
            peripheral,
            characteristic: info.uuid.clone(),
            write_type,
            fallback_write_length,
            state: DataChannelState::Idle,
            queue: VecDeque::new(),
        })
    }

    pub fn characteristic(&self) -> &str {
        &self.characteristic
    }

    pub fn write_type(&self) -> WriteType {
        self.write_type
    }

    pub fn state(&self) -> DataChannelState {
        self.state
    }

    /// Chunks waiting for a readiness signal
    pub fn pending_chunks(&self) -> usize {
        self.queue.len()
    }

    /// Queue `data` for transmission. Empty payloads are ignored.
    pub fn send(&mut self, adapter: &dyn CentralAdapter, data: &[u8]) {
        if data.is_empty() {
            trace!("Ignoring empty payload for {}", self.characteristic);
            return;
        }

        let chunk_len = match adapter.maximum_write_length(self.peripheral, self.write_type) {
            0 => self.fallback_write_length,
            reported => reported,
        };
        let chunks = Fragmenter::fragment(data, chunk_len);
        debug!(
            "Queueing {} byte(s) as {} chunk(s) for {}",
            data.len(),
            chunks.len(),
            self.characteristic
        );
        self.queue.extend(chunks);

        if self.state == DataChannelState::Idle {
            self.transmit_next(adapter);
        }
    }

    /// The link can take another write
    pub fn on_ready(&mut self, adapter: &dyn CentralAdapter) {
        self.transmit_next(adapter);
    }

    /// Drop everything still queued
    pub fn cancel_all(&mut self) {
        if !self.queue.is_empty() {
            debug!(
                "Dropping {} queued chunk(s) for {}",
                self.queue.len(),
                self.characteristic
            );
        }
        self.queue.clear();
        self.state = DataChannelState::Idle;
    }

    fn transmit_next(&mut self, adapter: &dyn CentralAdapter) {
        match self.queue.pop_front() {
            Some(chunk) => {
                adapter.write_value(self.peripheral, &self.characteristic, &chunk, self.write_type);
                self.state = DataChannelState::Draining;
            }
            None => self.state = DataChannelState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{CharacteristicProperties, DiscoveredCharacteristic};
    use crate::simulated::SimulatedAdapter;

    fn info(properties: CharacteristicProperties) -> CharacteristicInfo {
        CharacteristicInfo::new(
            "FFE0",
            &DiscoveredCharacteristic {
                uuid: "FFE1".to_string(),
                properties,
            },
        )
    }

    fn channel() -> SendDataChannel {
        SendDataChannel::new(
            PeripheralId::random(),
            &info(CharacteristicProperties::WRITE_WITHOUT_RESPONSE),
            DEFAULT_FALLBACK_WRITE_LENGTH,
        )
        .expect("writable")
    }

    #[test]
    fn test_fragmenter_chunks() {
        let data: Vec<u8> = (0..50).collect();
        let chunks = Fragmenter::fragment(&data, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 10);
        assert_eq!(chunks.concat(), data);
        assert!(Fragmenter::fragment(&[], 20).is_empty());
    }

    #[test]
    fn test_fragmenter_clamps_chunk_length() {
        let data = vec![0u8; 1_500];
        for chunk in Fragmenter::fragment(&data, 10_000) {
            assert!(chunk.len() <= MAX_CHARACTERISTIC_SIZE);
        }
    }

    #[test]
    fn test_not_writable_has_no_channel() {
        let result = SendDataChannel::new(
            PeripheralId::random(),
            &info(CharacteristicProperties::READ),
            DEFAULT_FALLBACK_WRITE_LENGTH,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_write_type_follows_properties() {
        let with_response = SendDataChannel::new(
            PeripheralId::random(),
            &info(CharacteristicProperties::WRITE),
            DEFAULT_FALLBACK_WRITE_LENGTH,
        )
        .unwrap();
        assert_eq!(with_response.write_type(), WriteType::WithResponse);
        assert_eq!(channel().write_type(), WriteType::WithoutResponse);
    }

    #[test]
    fn test_send_waits_for_readiness() {
        let adapter = SimulatedAdapter::powered_on();
        adapter.set_maximum_write_length(20);
        let mut channel = channel();
        let data: Vec<u8> = (0..50).collect();

        channel.send(&adapter, &data);
        assert_eq!(adapter.writes_to("FFE1").len(), 1);
        assert_eq!(channel.state(), DataChannelState::Draining);
        assert_eq!(channel.pending_chunks(), 2);

        channel.on_ready(&adapter);
        channel.on_ready(&adapter);
        assert_eq!(channel.state(), DataChannelState::Draining);
        channel.on_ready(&adapter);
        assert_eq!(channel.state(), DataChannelState::Idle);

        let writes = adapter.writes_to("FFE1");
        assert_eq!(writes.len(), 3);
        assert_eq!(writes.concat(), data);
    }

    #[test]
    fn test_second_send_queues_behind_first() {
        let adapter = SimulatedAdapter::powered_on();
        adapter.set_maximum_write_length(4);
        let mut channel = channel();

        channel.send(&adapter, &[1, 2, 3, 4, 5]);
        channel.send(&adapter, &[6, 7]);
        assert_eq!(adapter.writes_to("FFE1"), vec![vec![1, 2, 3, 4]]);

        channel.on_ready(&adapter);
        channel.on_ready(&adapter);
        assert_eq!(
            adapter.writes_to("FFE1"),
            vec![vec![1, 2, 3, 4], vec![5], vec![6, 7]]
        );
    }

    #[test]
    fn test_zero_write_length_uses_fallback() {
        let adapter = SimulatedAdapter::powered_on();
        adapter.set_maximum_write_length(0);
        let mut channel = channel();

        channel.send(&adapter, &[0u8; 30]);
        assert_eq!(adapter.writes_to("FFE1")[0].len(), DEFAULT_FALLBACK_WRITE_LENGTH);
    }

    #[test]
    fn test_empty_payload_ignored() {
        let adapter = SimulatedAdapter::powered_on();
        let mut channel = channel();

        channel.send(&adapter, &[]);
        assert!(adapter.calls().is_empty());
        assert_eq!(channel.state(), DataChannelState::Idle);
    }

    #[test]
    fn test_cancel_all_drops_queue() {
        let adapter = SimulatedAdapter::powered_on();
        adapter.set_maximum_write_length(1);
        let mut channel = channel();

        channel.send(&adapter, &[1, 2, 3]);
        channel.cancel_all();
        assert_eq!(channel.pending_chunks(), 0);
        assert_eq!(channel.state(), DataChannelState::Idle);

        channel.on_ready(&adapter);
        assert_eq!(adapter.writes_to("FFE1").len(), 1);
    }
}
