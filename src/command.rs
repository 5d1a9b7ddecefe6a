//! Round I/O types: the commands a round asks the outside world to run, and
//! the completion events the outside world feeds back into the next round.

use serde::{Deserialize, Serialize};

use crate::types::{StateName, Variables};

/// A unit of requested external work, keyed by the state that requested it.
///
/// Commands are opaque to the engine past issuance; it only cares about the
/// completion, correlated by state name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateCommand {
    /// Invoke the external work unit identified by `resource`.
    Task { name: StateName, resource: String },
    /// Suspend for `seconds` before reporting completion.
    Wait { name: StateName, seconds: u64 },
    /// Terminal marker: the whole workflow is done. Never issued externally.
    CompleteWorkflow,
}

impl StateCommand {
    /// The originating state, used to correlate the completion.
    /// `None` for the terminal marker.
    pub fn name(&self) -> Option<&StateName> {
        match self {
            StateCommand::Task { name, .. } | StateCommand::Wait { name, .. } => Some(name),
            StateCommand::CompleteWorkflow => None,
        }
    }
}

/// Input to one evaluation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineEvents {
    /// Which machine this execution is running; not interpreted by the
    /// evaluation itself, carried for logging and correlation.
    pub state_machine_name: String,
    /// States whose commands completed since the previous round.
    /// Empty on the very first round.
    pub completions: Vec<StateName>,
    /// The authoritative bindings as of the end of the previous round.
    pub variables: Variables,
}

impl StateMachineEvents {
    pub fn new(
        state_machine_name: impl Into<String>,
        completions: Vec<StateName>,
        variables: Variables,
    ) -> Self {
        Self {
            state_machine_name: state_machine_name.into(),
            completions,
            variables,
        }
    }

    /// The first round of an execution: no completions, no bindings.
    pub fn bootstrap(state_machine_name: impl Into<String>) -> Self {
        Self::new(state_machine_name, Vec::new(), Variables::new())
    }
}

/// Output accumulator for one evaluation round.
///
/// Seeded with the round's incoming variables, so bindings the round does
/// not touch pass through unchanged and the result is the complete next
/// variable map, not a delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineCommands {
    commands: Vec<StateCommand>,
    variables: Variables,
}

impl StateMachineCommands {
    pub fn seeded_from(variables: Variables) -> Self {
        Self {
            commands: Vec::new(),
            variables,
        }
    }

    pub fn push(&mut self, command: StateCommand) {
        self.commands.push(command);
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn commands(&self) -> &[StateCommand] {
        &self.commands
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn into_parts(self) -> (Vec<StateCommand>, Variables) {
        (self.commands, self.variables)
    }
}
