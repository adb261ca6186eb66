/// Command identifiers carried in byte 2 of a frame

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    /// Query hardware/firmware information (0xA0)
    HardwareInfo = 0xA0,
    /// Query current working state (0xA1)
    WorkingState = 0xA1,
    /// Drive the device (0xA2)
    Control = 0xA2,
}

impl CommandId {
    /// Known command for a raw id, if any
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xA0 => Some(CommandId::HardwareInfo),
            0xA1 => Some(CommandId::WorkingState),
            0xA2 => Some(CommandId::Control),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandId::HardwareInfo => write!(f, "HardwareInfo"),
            CommandId::WorkingState => write!(f, "WorkingState"),
            CommandId::Control => write!(f, "Control"),
        }
    }
}

impl From<CommandId> for u8 {
    fn from(command: CommandId) -> u8 {
        command.as_u8()
    }
}
