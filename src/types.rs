use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Variable bindings carried between evaluation rounds.
///
/// This is the only state an execution persists between rounds: user-level
/// workflow state plus the engine's own bookkeeping (the [`STARTED_VARIABLE`]
/// flag and one join counter per parallel state).
pub type Variables = BTreeMap<String, String>;

/// Reserved variable marking that the root has been expanded.
///
/// Absent on the very first round of an execution, `"true"` afterwards.
pub const STARTED_VARIABLE: &str = "started";

/// Hierarchical path identifier for a node in the definition tree.
///
/// Top-level states have a single segment. States declared inside a
/// `Parallel` branch are addressed by the parallel state's path followed by
/// their branch-local name, so the same local name can appear in different
/// branches without colliding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateName {
    segments: Vec<String>,
}

impl StateName {
    /// A top-level state name with a single segment.
    pub fn new(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    /// A name scoped under `parent`, or top-level when `parent` is `None`.
    pub fn child_of(segment: impl Into<String>, parent: Option<&StateName>) -> Self {
        let mut segments = parent.map(|p| p.segments.clone()).unwrap_or_default();
        segments.push(segment.into());
        Self { segments }
    }

    /// The enclosing scope, or `None` for a top-level name.
    pub fn parent(&self) -> Option<StateName> {
        if self.segments.len() == 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_name_has_no_parent() {
        let name = StateName::new("Hello World");
        assert_eq!(name.parent(), None);
        assert_eq!(name.to_string(), "Hello World");
    }

    #[test]
    fn nested_name_resolves_parent_chain() {
        let parallel = StateName::new("Fork");
        let branch_state = StateName::child_of("Download", Some(&parallel));
        assert_eq!(branch_state.to_string(), "Fork/Download");
        assert_eq!(branch_state.parent(), Some(parallel.clone()));

        let deeper = StateName::child_of("Retry", Some(&branch_state));
        assert_eq!(deeper.segments(), ["Fork", "Download", "Retry"]);
        assert_eq!(deeper.parent(), Some(branch_state));
    }

    #[test]
    fn equality_is_structural() {
        let a = StateName::child_of("B", Some(&StateName::new("A")));
        let b = StateName::child_of("B", Some(&StateName::new("A")));
        assert_eq!(a, b);
        assert_ne!(a, StateName::new("B"));
    }
}
