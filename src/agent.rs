use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentDefinitionError {
    #[error("Agent '{0}' must have non-empty instructions")]
    EmptyInstructions(AgentId),
}

/// Identifier of an agent, unique within a router instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// A named persona: instructions, the subset of registry tools it may invoke
/// and whether it is the entry agent for new threads. Immutable once built;
/// an agent's turn is a pure function of its instructions, its tool subset
/// and the visible history.
#[derive(Clone, Debug, Serialize)]
pub struct AgentDefinition {
    id: AgentId,
    instructions: String,
    tools: BTreeSet<String>,
    default_entry: bool,
}

impl AgentDefinition {
    pub fn builder(id: impl Into<AgentId>) -> AgentDefinitionBuilder {
        AgentDefinitionBuilder {
            id: id.into(),
            instructions: String::new(),
            tools: BTreeSet::new(),
            default_entry: false,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tools(&self) -> &BTreeSet<String> {
        &self.tools
    }

    pub fn is_default(&self) -> bool {
        self.default_entry
    }
}

pub struct AgentDefinitionBuilder {
    id: AgentId,
    instructions: String,
    tools: BTreeSet<String>,
    default_entry: bool,
}

impl AgentDefinitionBuilder {
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn add_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.insert(tool.into());
        self
    }

    pub fn tools(self, tools: Vec<String>) -> Self {
        tools
            .into_iter()
            .fold(self, |builder, tool| builder.add_tool(tool))
    }

    /// Marks this agent as the entry point for newly created threads.
    pub fn default_entry(mut self) -> Self {
        self.default_entry = true;
        self
    }

    pub fn build(self) -> Result<AgentDefinition, AgentDefinitionError> {
        if self.instructions.trim().is_empty() {
            return Err(AgentDefinitionError::EmptyInstructions(self.id));
        }
        Ok(AgentDefinition {
            id: self.id,
            instructions: self.instructions,
            tools: self.tools,
            default_entry: self.default_entry,
        })
    }
}
