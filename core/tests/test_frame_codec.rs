use bluecentral_core::protocol::{checksum, FRAME_LEN, PAYLOAD_LEN, START_BYTES};
use bluecentral_core::{CommandId, Frame, FrameError};
use proptest::prelude::*;

#[test]
fn test_known_frame_bytes() {
    let bytes = Frame::encode(0xA2, &[1, 2, 3]).unwrap();
    assert_eq!(
        bytes,
        [0xFA, 0xF9, 0xA2, 1, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x48]
    );

    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!(frame.command(), Some(CommandId::Control));
    assert_eq!(&frame.payload[..3], &[1, 2, 3]);
}

#[test]
fn test_query_frames() {
    let hardware = Frame::query_hardware_info().to_bytes();
    assert_eq!(hardware[2], 0xA0);
    assert_eq!(hardware[15], 0x42);

    let working = Frame::query_working_state().to_bytes();
    assert_eq!(working[2], 0xA1);
}

#[test]
fn test_unknown_command_id_still_decodes() {
    let bytes = Frame::encode(0x10, &[]).unwrap();
    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!(frame.command_id, 0x10);
    assert_eq!(frame.command(), None);
}

#[test]
fn test_corrupt_start_and_checksum_bytes() {
    let clean = Frame::query_working_state().to_bytes();
    for (index, start, sum) in [(0, true, false), (1, true, false), (FRAME_LEN - 1, false, true)] {
        let mut bytes = clean;
        bytes[index] ^= 0xFF;
        match Frame::decode(&bytes) {
            Err(FrameError::Malformed(malformed)) => {
                assert_eq!(malformed.bad_start_bytes, start, "byte {}", index);
                assert_eq!(malformed.bad_checksum, sum, "byte {}", index);
                assert_eq!(malformed.command_id, Some(0xA1));
            }
            other => panic!("corruption at {} not detected: {:?}", index, other),
        }
    }
}

proptest! {
    #[test]
    fn test_encode_decode_preserves_frame(
        command_id in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..=PAYLOAD_LEN),
    ) {
        let bytes = Frame::encode(command_id, &payload).unwrap();
        prop_assert_eq!(bytes.len(), FRAME_LEN);
        prop_assert_eq!(&bytes[..2], &START_BYTES[..]);

        let frame = Frame::decode(&bytes).unwrap();
        prop_assert_eq!(frame.command_id, command_id);
        prop_assert_eq!(&frame.payload[..payload.len()], &payload[..]);
        prop_assert!(frame.payload[payload.len()..].iter().all(|b| *b == 0));
        prop_assert_eq!(bytes[FRAME_LEN - 1], checksum(&frame.payload));
    }

    #[test]
    fn test_oversized_payload_rejected(payload in prop::collection::vec(any::<u8>(), PAYLOAD_LEN + 1..64)) {
        prop_assert_eq!(
            Frame::encode(0xA2, &payload),
            Err(FrameError::PayloadTooLong { len: payload.len() })
        );
    }

    #[test]
    fn test_single_byte_corruption_detected(
        payload in prop::collection::vec(any::<u8>(), PAYLOAD_LEN),
        index in (0..FRAME_LEN).prop_filter("command byte is not covered", |i| *i != 2),
        delta in 1..=255u8,
    ) {
        let mut bytes = Frame::encode(0xA1, &payload).unwrap();
        bytes[index] = bytes[index].wrapping_add(delta);

        match Frame::decode(&bytes) {
            Err(FrameError::Malformed(malformed)) => {
                prop_assert!(!malformed.bad_length);
                prop_assert_eq!(malformed.bad_start_bytes, index < 2);
                prop_assert_eq!(malformed.bad_checksum, index > 2);
            }
            other => prop_assert!(false, "corruption at {} not detected: {:?}", index, other),
        }
    }

    #[test]
    fn test_wrong_length_rejected(bytes in prop::collection::vec(any::<u8>(), 0..40)) {
        prop_assume!(bytes.len() != FRAME_LEN);
        match Frame::decode(&bytes) {
            Err(FrameError::Malformed(malformed)) => {
                prop_assert!(malformed.bad_length);
                prop_assert_eq!(malformed.length, bytes.len());
            }
            other => prop_assert!(false, "short buffer accepted: {:?}", other),
        }
    }
}
