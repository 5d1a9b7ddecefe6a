//! stepflow-core: a hierarchical state-machine workflow engine.
//!
//! Evaluates a declarative definition (a subset of the Amazon States
//! Language: `Task`, `Wait`, and `Parallel` states) against a stream of
//! asynchronous completion events. Each round turns the newly completed
//! states plus the current variable bindings into the next batch of
//! external commands; the [`interpreter::WorkflowRun`] loop drives rounds
//! against a caller-supplied [`interpreter::CommandExecutor`] until the
//! machine terminates.
//!
//! Definitions are immutable once built and safe to share across any
//! number of concurrent executions; all per-execution state lives in the
//! variable map threaded through the rounds.

pub mod command;
pub mod definition;
pub mod errors;
pub mod interpreter;
pub mod types;

// Re-export the main types
pub use command::{StateCommand, StateMachineCommands, StateMachineEvents};
pub use definition::loader::{from_document, parse_definition, DefinitionRegistry};
pub use definition::{StateKind, StateMachineDefinition, StateNode};
pub use errors::{DefinitionError, ExecutionError};
pub use interpreter::{CommandExecutor, WorkflowRun};
pub use types::{StateName, Variables, STARTED_VARIABLE};
