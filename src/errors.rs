//! Error taxonomy.
//!
//! Configuration errors ([`DefinitionError`]) are raised while loading or
//! building a definition and are fatal and non-retryable. Execution errors
//! ([`ExecutionError`]) terminate a single run; there is no per-command
//! retry or partial recovery.

use thiserror::Error;

use crate::types::StateName;

/// A definition document could not be turned into a usable machine.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("state type {0:?} is not supported")]
    UnsupportedStateType(String),

    #[error("state {from} references undefined state {to}")]
    DanglingReference { from: String, to: StateName },

    #[error("invalid definition document: {0}")]
    InvalidDocument(String),

    #[error("no definition found for {name} version {version}")]
    NotFound { name: String, version: String },

    #[error("failed to read definition file")]
    Io(#[from] std::io::Error),

    #[error("definition document is not valid JSON")]
    Json(#[from] serde_json::Error),
}

/// A single execution terminated abnormally.
///
/// The `UnknownState` and join-counter variants are programming-contract
/// violations (defects), not recoverable conditions.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unknown state: {0}")]
    UnknownState(StateName),

    #[error("state {0} is not terminal but has no successor")]
    MissingSuccessor(StateName),

    #[error("state {0} does not support child completion")]
    ChildCompletionUnsupported(StateName),

    #[error("join counter for {0} was never initialized")]
    MissingJoinCounter(StateName),

    #[error("join counter for {state} holds non-numeric value {value:?}")]
    CorruptJoinCounter { state: StateName, value: String },

    #[error("join counter for {0} received more completions than branches")]
    JoinCounterUnderflow(StateName),

    #[error("a command for {0} is already outstanding")]
    CommandAlreadyOutstanding(StateName),

    #[error("command for {state} failed")]
    CommandFailed {
        state: StateName,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution stalled: nothing outstanding and workflow not complete")]
    Stalled,
}
