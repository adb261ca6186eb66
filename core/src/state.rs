//! Operation state machine for the central
//!
//! Gates the high-level operations (scan, connect) on the adapter's current
//! availability and activity. Every rejected transition reports the current
//! state and the states from which the operation would have been legal.

use crate::availability::UnavailabilityReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Current activity of the central
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Created, adapter state not reported yet
    Initialized,
    /// Radio usable, nothing running
    Available,
    /// Radio unusable
    Unavailable(UnavailabilityReason),
    /// A discovery session is running
    Scanning,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "Initialized"),
            Self::Available => write!(f, "Available"),
            Self::Unavailable(reason) => write!(f, "Unavailable({})", reason),
            Self::Scanning => write!(f, "Scanning"),
        }
    }
}

/// Operations validated against the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetAvailable,
    SetUnavailable(UnavailabilityReason),
    Scan,
    StopScan,
    Connect,
}

/// An operation was requested from a state that does not allow it
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition from {current}, valid states: {}", format_states(.valid_states))]
pub struct TransitionError {
    pub current: OperationState,
    pub valid_states: Vec<OperationState>,
}

fn format_states(states: &[OperationState]) -> String {
    let names: Vec<String> = states.iter().map(|s| s.to_string()).collect();
    format!("[{}]", names.join(", "))
}

/// Owns the `OperationState`; the only way to change it is `validate`.
#[derive(Debug)]
pub struct CentralStateMachine {
    state: OperationState,
}

impl CentralStateMachine {
    pub fn new() -> Self {
        Self {
            state: OperationState::Initialized,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Check `operation` against the current state and apply its transition.
    pub fn validate(&mut self, operation: Operation) -> Result<(), TransitionError> {
        match operation {
            Operation::SetAvailable => {
                self.state = OperationState::Available;
                Ok(())
            }
            Operation::SetUnavailable(reason) => {
                self.state = OperationState::Unavailable(reason);
                Ok(())
            }
            Operation::Scan => match self.state {
                OperationState::Available => {
                    self.state = OperationState::Scanning;
                    Ok(())
                }
                current => Err(self.reject(current, vec![OperationState::Available])),
            },
            Operation::StopScan => {
                if self.state == OperationState::Scanning {
                    self.state = OperationState::Available;
                }
                Ok(())
            }
            Operation::Connect => match self.state {
                OperationState::Available | OperationState::Scanning => Ok(()),
                current => Err(self.reject(
                    current,
                    vec![OperationState::Available, OperationState::Scanning],
                )),
            },
        }
    }

    fn reject(&self, current: OperationState, valid_states: Vec<OperationState>) -> TransitionError {
        debug!("Rejected operation in state {}", current);
        TransitionError {
            current,
            valid_states,
        }
    }
}

impl Default for CentralStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: OperationState) -> CentralStateMachine {
        let mut machine = CentralStateMachine::new();
        match state {
            OperationState::Initialized => {}
            OperationState::Available => machine.validate(Operation::SetAvailable).unwrap(),
            OperationState::Unavailable(reason) => {
                machine.validate(Operation::SetUnavailable(reason)).unwrap()
            }
            OperationState::Scanning => {
                machine.validate(Operation::SetAvailable).unwrap();
                machine.validate(Operation::Scan).unwrap();
            }
        }
        machine
    }

    fn all_states() -> Vec<OperationState> {
        vec![
            OperationState::Initialized,
            OperationState::Available,
            OperationState::Unavailable(UnavailabilityReason::PoweredOff),
            OperationState::Scanning,
        ]
    }

    #[test]
    fn test_starts_initialized() {
        assert_eq!(CentralStateMachine::new().state(), OperationState::Initialized);
    }

    #[test]
    fn test_set_available_from_any_state() {
        for state in all_states() {
            let mut machine = machine_in(state);
            assert!(machine.validate(Operation::SetAvailable).is_ok());
            assert_eq!(machine.state(), OperationState::Available);
        }
    }

    #[test]
    fn test_set_unavailable_from_any_state() {
        for state in all_states() {
            let mut machine = machine_in(state);
            let reason = UnavailabilityReason::Unauthorized;
            assert!(machine.validate(Operation::SetUnavailable(reason)).is_ok());
            assert_eq!(machine.state(), OperationState::Unavailable(reason));
        }
    }

    #[test]
    fn test_scan_only_from_available() {
        let mut machine = machine_in(OperationState::Available);
        machine.validate(Operation::Scan).unwrap();
        assert_eq!(machine.state(), OperationState::Scanning);

        let err = machine.validate(Operation::Scan).unwrap_err();
        assert_eq!(err.current, OperationState::Scanning);
        assert_eq!(err.valid_states, vec![OperationState::Available]);
    }

    #[test]
    fn test_scan_while_powered_off_fails() {
        let reason = UnavailabilityReason::PoweredOff;
        let mut machine = machine_in(OperationState::Unavailable(reason));

        let err = machine.validate(Operation::Scan).unwrap_err();
        assert_eq!(err.current, OperationState::Unavailable(reason));
        assert_eq!(err.valid_states, vec![OperationState::Available]);
        assert_eq!(machine.state(), OperationState::Unavailable(reason));
    }

    #[test]
    fn test_connect_allowed_while_scanning() {
        let mut machine = machine_in(OperationState::Scanning);
        assert!(machine.validate(Operation::Connect).is_ok());
        assert_eq!(machine.state(), OperationState::Scanning);

        let mut machine = machine_in(OperationState::Available);
        assert!(machine.validate(Operation::Connect).is_ok());
        assert_eq!(machine.state(), OperationState::Available);
    }

    #[test]
    fn test_connect_rejected_lists_both_states() {
        for state in [
            OperationState::Initialized,
            OperationState::Unavailable(UnavailabilityReason::Resetting),
        ] {
            let mut machine = machine_in(state);
            let err = machine.validate(Operation::Connect).unwrap_err();
            assert_eq!(err.current, state);
            assert_eq!(
                err.valid_states,
                vec![OperationState::Available, OperationState::Scanning]
            );
        }
    }

    #[test]
    fn test_stop_scan_returns_to_available() {
        let mut machine = machine_in(OperationState::Scanning);
        machine.validate(Operation::StopScan).unwrap();
        assert_eq!(machine.state(), OperationState::Available);

        // Idempotent outside of Scanning
        let reason = UnavailabilityReason::PoweredOff;
        let mut machine = machine_in(OperationState::Unavailable(reason));
        machine.validate(Operation::StopScan).unwrap();
        assert_eq!(machine.state(), OperationState::Unavailable(reason));
    }

    #[test]
    fn test_error_message_lists_valid_states() {
        let mut machine = machine_in(OperationState::Initialized);
        let err = machine.validate(Operation::Connect).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid transition from Initialized, valid states: [Available, Scanning]"
        );
    }
}
