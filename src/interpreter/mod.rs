//! The interpreter loop: drives a definition against a live executor.
//!
//! Each iteration evaluates one round, issues the resulting commands, and
//! suspends until at least one outstanding command completes. Completions
//! collected while suspended become the next round's events. The loop is
//! strictly sequential; concurrency exists only in the spawned command
//! executions.


use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::command::{StateCommand, StateMachineEvents};
use crate::definition::StateMachineDefinition;
use crate::errors::ExecutionError;
use crate::types::{StateName, Variables};

/// Runs one `Task` or `Wait` command to completion.
///
/// The loop guarantees at most one live invocation per state name. A
/// successful command may return output bindings, which are folded into the
/// execution's variables before the next round. A returned error terminates
/// the whole execution; there is no per-command retry.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: StateCommand) -> anyhow::Result<Variables>;
}

type CommandOutcome = (StateName, anyhow::Result<Variables>);

/// One live execution of a state machine definition.
///
/// Owns the authoritative variable map and the outstanding-command set
/// exclusively; the definition itself is shared read-only.
pub struct WorkflowRun {
    state_machine_name: String,
    definition: Arc<StateMachineDefinition>,
    executor: Arc<dyn CommandExecutor>,
    variables: Variables,
    outstanding: BTreeSet<StateName>,
    completions: Vec<StateName>,
}

impl WorkflowRun {
    pub fn new(
        state_machine_name: impl Into<String>,
        definition: Arc<StateMachineDefinition>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            state_machine_name: state_machine_name.into(),
            definition,
            executor,
            variables: Variables::new(),
            outstanding: BTreeSet::new(),
            completions: Vec::new(),
        }
    }

    /// Drives the definition until it produces `CompleteWorkflow` or a
    /// command fails. Returns the final variable bindings.
    pub async fn run(mut self) -> Result<Variables, ExecutionError> {
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<CommandOutcome>();

        loop {
            let events = StateMachineEvents::new(
                self.state_machine_name.clone(),
                std::mem::take(&mut self.completions),
                self.variables.clone(),
            );
            debug!(machine = %self.state_machine_name, completions = events.completions.len(),
                "evaluating round");
            let round = self.definition.evaluate(&events)?;
            let (commands, variables) = round.into_parts();
            // The accumulator was seeded from the full map, so its output
            // is the authoritative next map, not a delta.
            self.variables = variables;

            let mut terminal = false;
            for command in commands {
                match command {
                    StateCommand::CompleteWorkflow => terminal = true,
                    command => self.issue(command, &outcome_tx)?,
                }
            }
            if terminal {
                info!(machine = %self.state_machine_name, "workflow complete");
                return Ok(self.variables);
            }
            if self.outstanding.is_empty() {
                error!(machine = %self.state_machine_name,
                    "nothing outstanding and workflow not complete");
                return Err(ExecutionError::Stalled);
            }

            // Sole suspension point: wait for at least one completion, then
            // drain whatever else finished in the meantime.
            match outcome_rx.recv().await {
                Some((name, result)) => self.fold_outcome(name, result)?,
                None => return Err(ExecutionError::Stalled),
            }
            while let Ok((name, result)) = outcome_rx.try_recv() {
                self.fold_outcome(name, result)?;
            }
        }
    }

    fn issue(
        &mut self,
        command: StateCommand,
        outcomes: &mpsc::UnboundedSender<CommandOutcome>,
    ) -> Result<(), ExecutionError> {
        let name = match command.name() {
            Some(name) => name.clone(),
            None => return Ok(()),
        };
        if !self.outstanding.insert(name.clone()) {
            return Err(ExecutionError::CommandAlreadyOutstanding(name));
        }
        trace!(state = %name, "issuing command");

        let executor = Arc::clone(&self.executor);
        let outcomes = outcomes.clone();
        tokio::spawn(async move {
            let result = executor.execute(command).await;
            // The run may already have terminated on a concurrent failure.
            let _ = outcomes.send((name, result));
        });
        Ok(())
    }

    fn fold_outcome(
        &mut self,
        name: StateName,
        result: anyhow::Result<Variables>,
    ) -> Result<(), ExecutionError> {
        if !self.outstanding.remove(&name) {
            trace!(state = %name, "dropping completion for command not outstanding");
            return Ok(());
        }
        match result {
            Ok(outputs) => {
                trace!(state = %name, outputs = outputs.len(), "command completed");
                self.variables.extend(outputs);
                self.completions.push(name);
                Ok(())
            }
            Err(source) => {
                error!(state = %name, error = %source, "command failed, terminating execution");
                Err(ExecutionError::CommandFailed { state: name, source })
            }
        }
    }
}
