//! The immutable definition tree and per-round evaluation.
//!
//! A [`StateMachineDefinition`] owns the full mapping from [`StateName`] to
//! node. Nodes never reference each other directly: successor and parent
//! relationships are encoded as names and resolved through the owning map,
//! so the tree has no cycles of ownership and can be shared read-only
//! across any number of concurrent executions.

pub mod loader;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::command::{StateCommand, StateMachineCommands, StateMachineEvents};
use crate::errors::{DefinitionError, ExecutionError};
use crate::types::{StateName, STARTED_VARIABLE};

/// Per-variant payload of a definition node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Task { resource: String },
    Wait { seconds: u64 },
    Parallel { branches: Vec<StateName> },
}

/// One node of the immutable definition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNode {
    pub name: StateName,
    /// Successor when this node is not the last in its sequence.
    pub next: Option<StateName>,
    /// Whether this node ends its (branch's) sequence.
    pub end: bool,
    pub kind: StateKind,
}

/// Name of the reserved join-counter variable for a parallel state.
pub(crate) fn join_counter_variable(name: &StateName) -> String {
    format!("parallel-{name}")
}

/// Where a terminal node's completion bubbles to: an enclosing parallel
/// state, or the synthetic root when the node is top-level.
enum Parent<'a> {
    Node(&'a StateNode),
    Root,
}

/// The full state map plus the root's `StartAt`, built once at load time
/// and never mutated afterward.
///
/// All execution state lives in the variables threaded through
/// [`evaluate`](Self::evaluate); the definition itself is reusable across
/// concurrent executions with disjoint variable maps.
#[derive(Debug, Clone)]
pub struct StateMachineDefinition {
    states: BTreeMap<StateName, StateNode>,
    start_at: StateName,
}

impl StateMachineDefinition {
    /// Builds a definition, verifying that `start_at` and every
    /// `next`/branch reference resolves to a defined state.
    pub fn new(
        states: BTreeMap<StateName, StateNode>,
        start_at: StateName,
    ) -> Result<Self, DefinitionError> {
        if !states.contains_key(&start_at) {
            return Err(DefinitionError::DanglingReference {
                from: "StartAt".to_string(),
                to: start_at,
            });
        }
        for node in states.values() {
            if let Some(next) = &node.next {
                if !states.contains_key(next) {
                    return Err(DefinitionError::DanglingReference {
                        from: node.name.to_string(),
                        to: next.clone(),
                    });
                }
            }
            if let StateKind::Parallel { branches } = &node.kind {
                for branch in branches {
                    if !states.contains_key(branch) {
                        return Err(DefinitionError::DanglingReference {
                            from: node.name.to_string(),
                            to: branch.clone(),
                        });
                    }
                }
            }
        }
        Ok(Self { states, start_at })
    }

    pub fn start_at(&self) -> &StateName {
        &self.start_at
    }

    pub fn lookup(&self, name: &StateName) -> Result<&StateNode, ExecutionError> {
        self.states
            .get(name)
            .ok_or_else(|| ExecutionError::UnknownState(name.clone()))
    }

    fn parent_of(&self, child: &StateName) -> Result<Parent<'_>, ExecutionError> {
        match child.parent() {
            Some(parent) => Ok(Parent::Node(self.lookup(&parent)?)),
            None => Ok(Parent::Root),
        }
    }

    /// Evaluates one round: folds the round's completions into the next
    /// batch of commands and variable bindings.
    ///
    /// On the first round of an execution (no [`STARTED_VARIABLE`] binding)
    /// the root is expanded instead, exactly once, regardless of the
    /// completion set. Duplicate completions for the same state within a
    /// round are ignored.
    pub fn evaluate(
        &self,
        events: &StateMachineEvents,
    ) -> Result<StateMachineCommands, ExecutionError> {
        let mut commands = StateMachineCommands::seeded_from(events.variables.clone());

        if !events.variables.contains_key(STARTED_VARIABLE) {
            debug!(machine = %events.state_machine_name, start_at = %self.start_at,
                "bootstrap round, expanding root");
            let head = self.lookup(&self.start_at)?;
            self.add_commands(head, &mut commands)?;
            commands.set_variable(STARTED_VARIABLE, "true");
            return Ok(commands);
        }

        let mut seen = BTreeSet::new();
        for name in &events.completions {
            if !seen.insert(name) {
                trace!(state = %name, "ignoring duplicate completion in round");
                continue;
            }
            let node = self.lookup(name)?;
            self.complete(node, &mut commands)?;
        }
        Ok(commands)
    }

    /// Appends the command(s) `node` wants to run right now.
    ///
    /// A parallel state expands every branch head and initializes its join
    /// counter to the branch count.
    fn add_commands(
        &self,
        node: &StateNode,
        commands: &mut StateMachineCommands,
    ) -> Result<(), ExecutionError> {
        match &node.kind {
            StateKind::Task { resource } => {
                commands.push(StateCommand::Task {
                    name: node.name.clone(),
                    resource: resource.clone(),
                });
            }
            StateKind::Wait { seconds } => {
                commands.push(StateCommand::Wait {
                    name: node.name.clone(),
                    seconds: *seconds,
                });
            }
            StateKind::Parallel { branches } => {
                for branch in branches {
                    let head = self.lookup(branch)?;
                    self.add_commands(head, commands)?;
                }
                commands.set_variable(join_counter_variable(&node.name), branches.len().to_string());
            }
        }
        Ok(())
    }

    /// Handles the completion of `node`'s own command: advance to the
    /// successor, or bubble up to the parent when the sequence ends.
    fn complete(
        &self,
        node: &StateNode,
        commands: &mut StateMachineCommands,
    ) -> Result<(), ExecutionError> {
        if node.end {
            return match self.parent_of(&node.name)? {
                Parent::Node(parent) => self.complete_child(parent, &node.name, commands),
                Parent::Root => {
                    commands.push(StateCommand::CompleteWorkflow);
                    Ok(())
                }
            };
        }
        let next = node
            .next
            .as_ref()
            .ok_or_else(|| ExecutionError::MissingSuccessor(node.name.clone()))?;
        let next_node = self.lookup(next)?;
        self.add_commands(next_node, commands)
    }

    /// Handles a child branch finishing inside `parent`.
    ///
    /// Only a parallel state can receive child completions; it decrements
    /// its join counter and completes itself when the last branch joins.
    fn complete_child(
        &self,
        parent: &StateNode,
        child: &StateName,
        commands: &mut StateMachineCommands,
    ) -> Result<(), ExecutionError> {
        if !matches!(parent.kind, StateKind::Parallel { .. }) {
            return Err(ExecutionError::ChildCompletionUnsupported(parent.name.clone()));
        }

        let variable = join_counter_variable(&parent.name);
        let stored = commands
            .variable(&variable)
            .ok_or_else(|| ExecutionError::MissingJoinCounter(parent.name.clone()))?;
        let count: u64 = stored.parse().map_err(|_| ExecutionError::CorruptJoinCounter {
            state: parent.name.clone(),
            value: stored.to_string(),
        })?;
        let remaining = count
            .checked_sub(1)
            .ok_or_else(|| ExecutionError::JoinCounterUnderflow(parent.name.clone()))?;

        commands.set_variable(variable, remaining.to_string());
        trace!(state = %parent.name, child = %child, remaining, "branch joined");

        if remaining == 0 {
            debug!(state = %parent.name, "all branches joined");
            self.complete(parent, commands)
        } else {
            Ok(())
        }
    }
}
