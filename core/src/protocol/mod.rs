//! Device command protocol carried over a write characteristic
//!
//! - Frame: fixed 16-byte command frame with start bytes and additive checksum
//! - CommandId: command identifiers understood by the target hardware

pub mod command;
pub mod frame;

pub use command::CommandId;
pub use frame::{checksum, Frame, FrameError, MalformedFrame, FRAME_LEN, PAYLOAD_LEN, START_BYTES};
