//! Tool use ledger — which tools each agent has used so far in a run.
//!
//! Only consulted to decide whether a forced `tool_choice` should be relaxed
//! once the agent has actually used a tool.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseTracker {
    #[serde(default)]
    agents: BTreeMap<String, Vec<String>>,
}

impl ToolUseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tools `agent` used in one turn.
    ///
    /// An empty `tool_names` only creates an entry when `allow_empty` is set,
    /// so "ran with zero tools" stays distinguishable from "not yet run".
    pub fn record(&mut self, agent: &str, tool_names: &[String], allow_empty: bool) {
        if tool_names.is_empty() && !allow_empty {
            return;
        }
        self.agents
            .entry(agent.to_string())
            .or_default()
            .extend(tool_names.iter().cloned());
    }

    /// Whether `agent` has used at least one tool.
    pub fn has_used_tools(&self, agent: &str) -> bool {
        self.agents.get(agent).is_some_and(|tools| !tools.is_empty())
    }

    /// Whether `agent` has an entry at all (possibly empty).
    pub fn has_entry(&self, agent: &str) -> bool {
        self.agents.contains_key(agent)
    }

    pub fn tools_used_by(&self, agent: &str) -> &[String] {
        self.agents.get(agent).map(Vec::as_slice).unwrap_or(&[])
    }
}
