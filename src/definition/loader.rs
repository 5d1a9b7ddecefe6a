//! Translates definition documents into in-memory machines, and caches
//! loaded machines per `(name, version)`.
//!
//! A document is the JSON subset of the Amazon States Language this engine
//! understands:
//!
//! ```json
//! {
//!   "StartAt": "A",
//!   "States": {
//!     "A": { "Type": "Task", "Resource": "worker://encode", "End": true }
//!   }
//! }
//! ```
//!
//! `Parallel` states carry `Branches`, each a nested `StartAt`/`States`
//! document whose states are scoped under the parallel state's name.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info};

use super::{StateKind, StateMachineDefinition, StateNode};
use crate::errors::DefinitionError;
use crate::types::StateName;

/// Parses a definition document from its textual form.
pub fn parse_definition(document: &str) -> Result<StateMachineDefinition, DefinitionError> {
    let document: JsonValue = serde_json::from_str(document)?;
    from_document(&document)
}

/// Builds a definition from an already-parsed document.
pub fn from_document(document: &JsonValue) -> Result<StateMachineDefinition, DefinitionError> {
    let start_at = StateName::new(require_str(document, "StartAt")?);
    let mut states = BTreeMap::new();
    add_states(require_object(document, "States")?, None, &mut states)?;
    StateMachineDefinition::new(states, start_at)
}

fn add_states(
    json_states: &JsonMap<String, JsonValue>,
    parent: Option<&StateName>,
    states: &mut BTreeMap<StateName, StateNode>,
) -> Result<(), DefinitionError> {
    for (local_name, value) in json_states {
        let name = StateName::child_of(local_name.as_str(), parent);
        add_state(name, value, states)?;
    }
    Ok(())
}

fn add_state(
    name: StateName,
    value: &JsonValue,
    states: &mut BTreeMap<StateName, StateNode>,
) -> Result<(), DefinitionError> {
    let state_type = require_str(value, "Type")?;
    // Next resolves in the node's own scope (its sibling states).
    let next = value
        .get("Next")
        .and_then(JsonValue::as_str)
        .map(|next| StateName::child_of(next, name.parent().as_ref()));
    let end = value.get("End").and_then(JsonValue::as_bool).unwrap_or(false);

    let kind = match state_type {
        "Task" => StateKind::Task {
            resource: require_str(value, "Resource")?.to_string(),
        },
        "Wait" => StateKind::Wait {
            seconds: parse_seconds(&name, value)?,
        },
        "Parallel" => {
            let json_branches = value
                .get("Branches")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| {
                    DefinitionError::InvalidDocument(format!(
                        "parallel state {name} has no Branches array"
                    ))
                })?;
            let mut branches = Vec::with_capacity(json_branches.len());
            for branch in json_branches {
                let head = StateName::child_of(require_str(branch, "StartAt")?, Some(&name));
                branches.push(head);
                add_states(require_object(branch, "States")?, Some(&name), states)?;
            }
            StateKind::Parallel { branches }
        }
        other => return Err(DefinitionError::UnsupportedStateType(other.to_string())),
    };

    if !end && next.is_none() {
        return Err(DefinitionError::InvalidDocument(format!(
            "state {name} is not End and has no Next"
        )));
    }

    states.insert(
        name.clone(),
        StateNode {
            name,
            next,
            end,
            kind,
        },
    );
    Ok(())
}

/// `Seconds` is a non-negative integer; a numeric string is also accepted,
/// which is how older documents encode it.
fn parse_seconds(name: &StateName, value: &JsonValue) -> Result<u64, DefinitionError> {
    let seconds = value.get("Seconds").ok_or_else(|| {
        DefinitionError::InvalidDocument(format!("wait state {name} has no Seconds"))
    })?;
    match seconds {
        JsonValue::Number(n) => n.as_u64().ok_or_else(|| {
            DefinitionError::InvalidDocument(format!("wait state {name} has negative Seconds"))
        }),
        JsonValue::String(s) => s.parse().map_err(|_| {
            DefinitionError::InvalidDocument(format!(
                "wait state {name} has non-numeric Seconds {s:?}"
            ))
        }),
        _ => Err(DefinitionError::InvalidDocument(format!(
            "wait state {name} has non-numeric Seconds"
        ))),
    }
}

fn require_str<'a>(value: &'a JsonValue, field: &str) -> Result<&'a str, DefinitionError> {
    value
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| DefinitionError::InvalidDocument(format!("missing string field {field}")))
}

fn require_object<'a>(
    value: &'a JsonValue,
    field: &str,
) -> Result<&'a JsonMap<String, JsonValue>, DefinitionError> {
    value
        .get(field)
        .and_then(JsonValue::as_object)
        .ok_or_else(|| DefinitionError::InvalidDocument(format!("missing object field {field}")))
}

/// Loads and caches definitions by `(name, version)`.
///
/// Searches the configured directories for `<name>@<version>.json` first,
/// then `<name>.json`. Loaded machines are shared as `Arc`s, so any number
/// of concurrent executions can evaluate the same definition.
#[derive(Default)]
pub struct DefinitionRegistry {
    paths: Vec<PathBuf>,
    definitions: RwLock<HashMap<(String, String), Arc<StateMachineDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory to search for definition files.
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn get(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Arc<StateMachineDefinition>, DefinitionError> {
        let key = (name.to_string(), version.to_string());
        {
            let cache = self.definitions.read().unwrap_or_else(|e| e.into_inner());
            if let Some(definition) = cache.get(&key) {
                return Ok(Arc::clone(definition));
            }
        }

        let definition = Arc::new(self.load(name, version)?);
        let mut cache = self.definitions.write().unwrap_or_else(|e| e.into_inner());
        let definition = cache.entry(key).or_insert(definition);
        Ok(Arc::clone(definition))
    }

    fn load(&self, name: &str, version: &str) -> Result<StateMachineDefinition, DefinitionError> {
        for directory in &self.paths {
            for file_name in [format!("{name}@{version}.json"), format!("{name}.json")] {
                let path = directory.join(&file_name);
                if !path.is_file() {
                    continue;
                }
                debug!(definition = name, version, path = %path.display(), "loading definition");
                let document = fs::read_to_string(&path)?;
                let definition = parse_definition(&document)?;
                info!(definition = name, version, "definition loaded");
                return Ok(definition);
            }
        }
        Err(DefinitionError::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::definition::StateKind;

    #[test]
    fn branch_states_nest_under_the_parallel_name() {
        let machine = from_document(&json!({
            "StartAt": "Fork",
            "States": {
                "Fork": {
                    "Type": "Parallel",
                    "End": true,
                    "Branches": [
                        { "StartAt": "Left", "States": { "Left": { "Type": "Task", "Resource": "l", "End": true } } }
                    ]
                }
            }
        }))
        .unwrap();

        let nested = StateName::child_of("Left", Some(&StateName::new("Fork")));
        let node = machine.lookup(&nested).unwrap();
        assert_eq!(node.name, nested);
        assert_eq!(
            node.kind,
            StateKind::Task {
                resource: "l".to_string()
            }
        );
    }

    #[test]
    fn next_resolves_among_branch_siblings() {
        let machine = from_document(&json!({
            "StartAt": "Fork",
            "States": {
                "Fork": {
                    "Type": "Parallel",
                    "End": true,
                    "Branches": [
                        {
                            "StartAt": "First",
                            "States": {
                                "First": { "Type": "Task", "Resource": "a", "Next": "Second" },
                                "Second": { "Type": "Task", "Resource": "b", "End": true }
                            }
                        }
                    ]
                }
            }
        }))
        .unwrap();

        let fork = StateName::new("Fork");
        let first = machine
            .lookup(&StateName::child_of("First", Some(&fork)))
            .unwrap();
        assert_eq!(first.next, Some(StateName::child_of("Second", Some(&fork))));
    }

    #[test]
    fn seconds_accepts_integer_and_numeric_string() {
        for seconds in [json!(30), json!("30")] {
            let machine = from_document(&json!({
                "StartAt": "W",
                "States": {
                    "W": { "Type": "Wait", "Seconds": seconds, "End": true }
                }
            }))
            .unwrap();
            let node = machine.lookup(&StateName::new("W")).unwrap();
            assert_eq!(node.kind, StateKind::Wait { seconds: 30 });
        }
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let err = from_document(&json!({
            "StartAt": "C",
            "States": {
                "C": { "Type": "Choice", "End": true }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, DefinitionError::UnsupportedStateType(t) if t == "Choice"));
    }

    #[test]
    fn state_without_next_or_end_is_rejected() {
        let err = from_document(&json!({
            "StartAt": "A",
            "States": {
                "A": { "Type": "Task", "Resource": "r" }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidDocument(_)));
    }

    #[test]
    fn registry_prefers_versioned_file_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("order.json"),
            json!({
                "StartAt": "Unversioned",
                "States": { "Unversioned": { "Type": "Task", "Resource": "r", "End": true } }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("order@2.json"),
            json!({
                "StartAt": "Versioned",
                "States": { "Versioned": { "Type": "Task", "Resource": "r", "End": true } }
            })
            .to_string(),
        )
        .unwrap();

        let registry = DefinitionRegistry::new().add_path(dir.path());

        let v2 = registry.get("order", "2").unwrap();
        assert_eq!(v2.start_at(), &StateName::new("Versioned"));

        let v1 = registry.get("order", "1").unwrap();
        assert_eq!(v1.start_at(), &StateName::new("Unversioned"));

        // Same key returns the cached Arc.
        let again = registry.get("order", "2").unwrap();
        assert!(Arc::ptr_eq(&v2, &again));
    }

    #[test]
    fn registry_reports_missing_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DefinitionRegistry::new().add_path(dir.path());
        let err = registry.get("ghost", "1").unwrap_err();
        assert!(matches!(err, DefinitionError::NotFound { .. }));
    }
}
