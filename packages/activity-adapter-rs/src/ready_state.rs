//! Connection ready-state machine.
//!
//! ```text
//!             ┌──────────── error ───────────┐
//!             ▼                              │
//!        CONNECTING ──── open ────► OPEN ────┤
//!             │                              │
//!             └──────── error ──────► CLOSED ◄┘   (terminal)
//! ```
//!
//! Every accepted transition dispatches a lifecycle event: `open` when the new
//! state is `OPEN`, `error` for everything else (including `CLOSED`).

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::events::EventType;

/// Connection lifecycle value.
///
/// Codes follow the WebSocket convention (`CLOSING` is not used).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReadyState {
    /// Initial state; upstream not yet established.
    #[default]
    Connecting,
    /// Upstream established.
    Open,
    /// Terminal. No transition leaves this state.
    Closed,
}

impl ReadyState {
    /// Numeric code of this state.
    pub fn code(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closed => 3,
        }
    }

    /// Whether no further transition is permitted.
    pub fn is_terminal(self) -> bool {
        self == ReadyState::Closed
    }

    /// The lifecycle event dispatched when entering this state.
    pub fn lifecycle_event(self) -> EventType {
        match self {
            ReadyState::Open => EventType::Open,
            ReadyState::Connecting | ReadyState::Closed => EventType::Error,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "CONNECTING"),
            ReadyState::Open => write!(f, "OPEN"),
            ReadyState::Closed => write!(f, "CLOSED"),
        }
    }
}

impl TryFrom<u8> for ReadyState {
    type Error = AdapterError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ReadyState::Connecting),
            1 => Ok(ReadyState::Open),
            3 => Ok(ReadyState::Closed),
            code => Err(AdapterError::UnknownReadyState { code }),
        }
    }
}

impl From<ReadyState> for u8 {
    fn from(state: ReadyState) -> Self {
        state.code()
    }
}

/// Result of a transition request that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Requested state equals the current one; nothing happens.
    Unchanged,
    /// State moved.
    Moved {
        from: ReadyState,
        to: ReadyState,
    },
}

/// Holder for the current ready state. Mutated only via [`ReadyStateMachine::transition`].
#[derive(Debug, Default)]
pub(crate) struct ReadyStateMachine {
    current: Mutex<ReadyState>,
}

impl ReadyStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ReadyState {
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Commit `next` if legal.
    ///
    /// Side effects (releasing the upstream, dispatching the lifecycle event)
    /// are the caller's job so they run without the lock held.
    pub fn transition(&self, next: ReadyState) -> Result<Transition, AdapterError> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if *current == next {
            return Ok(Transition::Unchanged);
        }

        if current.is_terminal() {
            return Err(AdapterError::ReadyStateClosed { requested: next });
        }

        let from = *current;
        *current = next;
        Ok(Transition::Moved { from, to: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_initial_state_is_connecting() {
        let machine = ReadyStateMachine::new();
        assert_eq!(machine.get(), ReadyState::Connecting);
    }

    #[test]
    fn test_same_state_is_noop() {
        let machine = ReadyStateMachine::new();
        assert_eq!(
            machine.transition(ReadyState::Connecting).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_connecting_open_closed() {
        let machine = ReadyStateMachine::new();
        assert_eq!(
            machine.transition(ReadyState::Open).unwrap(),
            Transition::Moved {
                from: ReadyState::Connecting,
                to: ReadyState::Open
            }
        );
        assert_eq!(
            machine.transition(ReadyState::Closed).unwrap(),
            Transition::Moved {
                from: ReadyState::Open,
                to: ReadyState::Closed
            }
        );
        assert_eq!(machine.get(), ReadyState::Closed);
    }

    #[test]
    fn test_open_back_to_connecting_is_allowed() {
        let machine = ReadyStateMachine::new();
        machine.transition(ReadyState::Open).unwrap();
        machine.transition(ReadyState::Connecting).unwrap();
        assert_eq!(machine.get(), ReadyState::Connecting);
    }

    #[test]
    fn test_closed_is_terminal() {
        let machine = ReadyStateMachine::new();
        machine.transition(ReadyState::Closed).unwrap();

        for next in [ReadyState::Connecting, ReadyState::Open] {
            let err = machine.transition(next).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::State);
        }

        // Requesting CLOSED again is the same-state no-op.
        assert_eq!(
            machine.transition(ReadyState::Closed).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(machine.get(), ReadyState::Closed);
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(ReadyState::try_from(1).unwrap(), ReadyState::Open);
        let err = ReadyState::try_from(2).unwrap_err();
        assert!(matches!(err, AdapterError::UnknownReadyState { code: 2 }));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn test_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&ReadyState::Closed).unwrap(), "3");
        let state: ReadyState = serde_json::from_str("0").unwrap();
        assert_eq!(state, ReadyState::Connecting);
        assert!(serde_json::from_str::<ReadyState>("9").is_err());
    }

    #[test]
    fn test_lifecycle_events() {
        assert_eq!(ReadyState::Open.lifecycle_event(), EventType::Open);
        assert_eq!(ReadyState::Closed.lifecycle_event(), EventType::Error);
        assert_eq!(ReadyState::Connecting.lifecycle_event(), EventType::Error);
    }
}
