/// Command frame: fixed 16-byte layout with an additive checksum
///
/// Format:
/// [2 bytes]  start bytes 0xFA 0xF9
/// [1 byte]   command id
/// [12 bytes] payload, zero padded
/// [1 byte]   checksum = (sum of payload bytes + 0x42) mod 256

use super::command::CommandId;
use std::fmt;
use thiserror::Error;

/// Total frame length in bytes
pub const FRAME_LEN: usize = 16;
/// Payload bytes per frame
pub const PAYLOAD_LEN: usize = 12;
/// Leading marker of every frame
pub const START_BYTES: [u8; 2] = [0xFA, 0xF9];

const CHECKSUM_SEED: u8 = 0x42;
const COMMAND_OFFSET: usize = 2;
const PAYLOAD_OFFSET: usize = 3;
const CHECKSUM_OFFSET: usize = PAYLOAD_OFFSET + PAYLOAD_LEN;

/// Checksum over a full payload block
pub fn checksum(payload: &[u8; PAYLOAD_LEN]) -> u8 {
    payload
        .iter()
        .fold(CHECKSUM_SEED, |acc, byte| acc.wrapping_add(*byte))
}

/// What was wrong with a buffer that failed to decode.
///
/// Each check is reported on its own; the fields hold whatever could still be
/// read from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFrame {
    pub length: usize,
    pub bad_length: bool,
    pub bad_start_bytes: bool,
    pub bad_checksum: bool,
    pub command_id: Option<u8>,
    pub payload: Option<[u8; PAYLOAD_LEN]>,
    pub checksum: Option<u8>,
}

impl fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut problems = Vec::new();
        if self.bad_length {
            problems.push(format!("length {} (expected {})", self.length, FRAME_LEN));
        }
        if self.bad_start_bytes {
            problems.push("start bytes".to_string());
        }
        if self.bad_checksum {
            problems.push("checksum".to_string());
        }
        write!(f, "bad {}", problems.join(", "))
    }
}

/// Errors for frame encoding and decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {len} bytes (max {max})", max = PAYLOAD_LEN)]
    PayloadTooLong { len: usize },
    #[error("Malformed frame: {0}")]
    Malformed(MalformedFrame),
}

/// A decoded command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command_id: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

impl Frame {
    /// Build a frame, zero padding `payload` to the full block
    pub fn new(command_id: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong { len: payload.len() });
        }
        let mut block = [0u8; PAYLOAD_LEN];
        block[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            command_id,
            payload: block,
        })
    }

    /// Encode `command_id` and `payload` straight to wire bytes
    pub fn encode(command_id: u8, payload: &[u8]) -> Result<[u8; FRAME_LEN], FrameError> {
        Ok(Self::new(command_id, payload)?.to_bytes())
    }

    /// Serialize to the 16-byte wire form
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..COMMAND_OFFSET].copy_from_slice(&START_BYTES);
        bytes[COMMAND_OFFSET] = self.command_id;
        bytes[PAYLOAD_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&self.payload);
        bytes[CHECKSUM_OFFSET] = checksum(&self.payload);
        bytes
    }

    /// Parse and verify a received buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let bad_length = bytes.len() != FRAME_LEN;
        let bad_start_bytes = bytes.len() < START_BYTES.len() || bytes[..2] != START_BYTES;

        let command_id = bytes.get(COMMAND_OFFSET).copied();
        let payload: Option<[u8; PAYLOAD_LEN]> = bytes
            .get(PAYLOAD_OFFSET..CHECKSUM_OFFSET)
            .and_then(|block| block.try_into().ok());
        let received_checksum = bytes.get(CHECKSUM_OFFSET).copied();

        let bad_checksum = match (&payload, received_checksum) {
            (Some(block), Some(received)) => checksum(block) != received,
            _ => false,
        };

        match (command_id, payload) {
            (Some(command_id), Some(payload)) if !bad_length && !bad_start_bytes && !bad_checksum => {
                Ok(Self {
                    command_id,
                    payload,
                })
            }
            _ => Err(FrameError::Malformed(MalformedFrame {
                length: bytes.len(),
                bad_length,
                bad_start_bytes,
                bad_checksum,
                command_id,
                payload,
                checksum: received_checksum,
            })),
        }
    }

    /// Checksum this frame carries on the wire
    pub fn checksum(&self) -> u8 {
        checksum(&self.payload)
    }

    /// The known command, if the id is one
    pub fn command(&self) -> Option<CommandId> {
        CommandId::from_u8(self.command_id)
    }

    pub fn query_hardware_info() -> Self {
        Self {
            command_id: CommandId::HardwareInfo.as_u8(),
            payload: [0u8; PAYLOAD_LEN],
        }
    }

    pub fn query_working_state() -> Self {
        Self {
            command_id: CommandId::WorkingState.as_u8(),
            payload: [0u8; PAYLOAD_LEN],
        }
    }

    /// Control command with up to 12 bytes of arguments
    pub fn control(payload: &[u8]) -> Result<Self, FrameError> {
        Self::new(CommandId::Control.as_u8(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_example() {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = 1;
        payload[1] = 2;
        payload[2] = 3;
        assert_eq!(checksum(&payload), 0x48);

        let bytes = Frame::encode(0xA0, &[1, 2, 3]).expect("Valid payload");
        assert_eq!(&bytes[..3], &[0xFA, 0xF9, 0xA0]);
        assert_eq!(&bytes[3..6], &[1, 2, 3]);
        assert!(bytes[6..15].iter().all(|b| *b == 0));
        assert_eq!(bytes[15], 0x48);
    }

    #[test]
    fn test_checksum_wraps() {
        let payload = [0xFFu8; PAYLOAD_LEN];
        // 12 * 0xFF = 0xBF4, low byte 0xF4; + 0x42 wraps to 0x36
        assert_eq!(checksum(&payload), 0x36);
    }

    #[test]
    fn test_payload_too_long() {
        let result = Frame::encode(0xA2, &[0u8; 13]);
        assert_eq!(result, Err(FrameError::PayloadTooLong { len: 13 }));
    }

    #[test]
    fn test_full_payload_accepted() {
        let payload = [7u8; PAYLOAD_LEN];
        let frame = Frame::decode(&Frame::encode(0x01, &payload).unwrap()).unwrap();
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.command_id, 0x01);
        assert_eq!(frame.command(), None);
    }

    #[test]
    fn test_decode_short_buffer() {
        match Frame::decode(&[0xFA, 0xF9, 0xA0]) {
            Err(FrameError::Malformed(malformed)) => {
                assert!(malformed.bad_length);
                assert!(!malformed.bad_start_bytes);
                assert!(!malformed.bad_checksum);
                assert_eq!(malformed.command_id, Some(0xA0));
                assert_eq!(malformed.payload, None);
            }
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reports_each_violation() {
        let mut bytes = Frame::encode(0xA1, &[9]).unwrap();
        bytes[0] = 0x00;
        bytes[15] = bytes[15].wrapping_add(1);

        match Frame::decode(&bytes) {
            Err(FrameError::Malformed(malformed)) => {
                assert!(!malformed.bad_length);
                assert!(malformed.bad_start_bytes);
                assert!(malformed.bad_checksum);
                assert_eq!(malformed.command_id, Some(0xA1));
                assert_eq!(malformed.checksum, Some(bytes[15]));
                let text = malformed.to_string();
                assert!(text.contains("start bytes"));
                assert!(text.contains("checksum"));
            }
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_buffer() {
        match Frame::decode(&[]) {
            Err(FrameError::Malformed(malformed)) => {
                assert!(malformed.bad_length);
                assert!(malformed.bad_start_bytes);
                assert_eq!(malformed.length, 0);
            }
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_command_builders() {
        let info = Frame::query_hardware_info();
        assert_eq!(info.command(), Some(CommandId::HardwareInfo));
        assert_eq!(info.to_bytes()[15], 0x42);

        let state = Frame::query_working_state();
        assert_eq!(state.command(), Some(CommandId::WorkingState));

        let control = Frame::control(&[0x01, 0x10]).unwrap();
        assert_eq!(control.command(), Some(CommandId::Control));
        assert_eq!(control.checksum(), 0x53);
        assert!(Frame::control(&[0u8; 20]).is_err());
    }
}
