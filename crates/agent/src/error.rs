//! Errors surfaced by the engine to its host.

use runwright_core::error::EngineError;
use thiserror::Error;

use crate::state::RunState;

/// A fatal engine condition paired with the state at the time it happened.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct RunError {
    #[source]
    pub kind: EngineError,
    pub state: Box<RunState>,
}

impl RunError {
    pub fn new(kind: EngineError, state: RunState) -> Self {
        Self {
            kind,
            state: Box::new(state),
        }
    }

    pub fn into_state(self) -> RunState {
        *self.state
    }
}

/// A run state snapshot could not be read or written.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Run state snapshot has no schema_version")]
    MissingVersion,

    #[error("Unsupported run state version {found} (expected {expected})")]
    UnsupportedVersion { found: u64, expected: u32 },

    #[error("Run state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
