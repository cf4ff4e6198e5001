//! Structured error types for the activity adapter.
//!
//! `AdapterError` provides pattern-matchable errors for every failure the
//! adapter core can report. Each variant belongs to one [`ErrorKind`], which
//! tells the caller whether the failure is fatal (construction) or local to
//! the call that raised it.
//!
//! # The Error Boundary Rule
//!
//! > **Upstream producer errors never become `AdapterError`s.**
//!
//! - `anyhow` is internal transport (producers and egress implementations)
//! - `AdapterError` is what the adapter surface returns
//! - A producer failure is surfaced as an `error` lifecycle event instead
//!
//! # Example
//!
//! ```ignore
//! use activity_adapter::{AdapterError, ErrorKind};
//!
//! match adapter.set_config("late_key", "value") {
//!     Ok(()) => {}
//!     Err(e) if e.kind() == ErrorKind::Configuration => {
//!         // Key was not declared before sealing; safe to ignore.
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::ready_state::ReadyState;

/// Coarse classification of adapter errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The enhancer chain produced an unusable adapter. Fatal: no adapter exists.
    Construction,
    /// A config key was written after sealing without being declared first.
    Configuration,
    /// An illegal ready-state transition or an unknown ready-state value.
    State,
    /// A capability (egress) was used without an enhancer providing it.
    NotImplemented,
    /// An enhancer-provided egress implementation failed.
    Egress,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Construction => write!(f, "construction_error"),
            ErrorKind::Configuration => write!(f, "configuration_error"),
            ErrorKind::State => write!(f, "state_error"),
            ErrorKind::NotImplemented => write!(f, "not_implemented"),
            ErrorKind::Egress => write!(f, "egress_error"),
        }
    }
}

/// Errors returned by adapter construction and the adapter surface.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// The enhancer chain returned an adapter built by another construction.
    #[error("adapter returned from enhancer was not built by this construction's base factory")]
    ForeignAdapter,

    /// A config key was written after sealing without being set before.
    #[error("cannot set config \"{key}\" because it was not set before the adapter was sealed")]
    ConfigSealed {
        /// The rejected key.
        key: String,
    },

    /// A transition was requested after the adapter reached `CLOSED`.
    #[error("cannot change ready state to {requested} after it is CLOSED")]
    ReadyStateClosed {
        /// The state that was requested.
        requested: ReadyState,
    },

    /// A ready-state value outside `CONNECTING`, `OPEN`, `CLOSED`.
    #[error("ready state must be either CLOSED, CONNECTING or OPEN (got code {code})")]
    UnknownReadyState {
        /// The raw code that failed to convert.
        code: u8,
    },

    /// `egress()` was called but no enhancer provides it.
    #[error("there are no enhancers registered for egress()")]
    EgressNotImplemented,

    /// An egress implementation failed to deliver an activity.
    #[error("egress failed: {0}")]
    Egress(#[source] anyhow::Error),
}

impl AdapterError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::ForeignAdapter => ErrorKind::Construction,
            AdapterError::ConfigSealed { .. } => ErrorKind::Configuration,
            AdapterError::ReadyStateClosed { .. } | AdapterError::UnknownReadyState { .. } => {
                ErrorKind::State
            }
            AdapterError::EgressNotImplemented => ErrorKind::NotImplemented,
            AdapterError::Egress(_) => ErrorKind::Egress,
        }
    }

    /// Whether the caller can recover by catching the error and carrying on.
    ///
    /// Only construction errors are fatal; everything else is local to the call.
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Construction
    }
}
