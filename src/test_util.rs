//! Hand-rolled fixtures shared by the router and session tests: a scripted
//! gateway and the customer-support agent pair.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use futures::future::BoxFuture;
use serde_json::json;

use crate::{
    agent::AgentDefinition,
    llm::{CompletionError, CompletionGateway, CompletionRequest, CompletionResult},
    tool::{FunctionTool, HandoffTool, ToolRegistry},
};

pub(crate) const GENERAL_INSTRUCTIONS: &str =
    "You are general support. Transfer technical problems to the technical specialist.";
pub(crate) const TECH_INSTRUCTIONS: &str =
    "You are a technical specialist. Use 'solve_issue' to solve problems.";

/// Replays per-instruction scripts of completion results and records every
/// request it sees.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<CompletionResult>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(self, instructions: &str, results: Vec<CompletionResult>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(instructions.to_owned())
            .or_default()
            .extend(results);
        self
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionGateway for ScriptedGateway {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<CompletionResult, CompletionError>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&request.instructions).ok_or_else(|| {
                CompletionError::Provider(format!(
                    "no script for instructions: {}",
                    request.instructions
                ))
            })?;
            queue
                .pop_front()
                .ok_or_else(|| CompletionError::Provider("script exhausted".to_owned()))
        })
    }
}

pub(crate) fn support_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register_handoff(HandoffTool::new(
            "transfer_to_tech",
            "Transfer to the technical specialist.",
            "tech",
        ))
        .unwrap();
    registry
        .register_handoff(HandoffTool::new(
            "transfer_to_general",
            "Transfer back to general support.",
            "general",
        ))
        .unwrap();
    registry
        .register(FunctionTool::new(
            "solve_issue",
            "Solves a technical issue.",
            json!({
                "type": "object",
                "properties": {
                    "issue": {"type": "string", "description": "Description of the issue"}
                },
                "required": ["issue"],
            }),
            |arguments| async move {
                let issue = arguments
                    .get("issue")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(format!("Solution for '{issue}': try restarting the app."))
            },
        ))
        .unwrap();
    registry
}

pub(crate) fn support_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::builder("general")
            .instructions(GENERAL_INSTRUCTIONS)
            .add_tool("transfer_to_tech")
            .default_entry()
            .build()
            .unwrap(),
        AgentDefinition::builder("tech")
            .instructions(TECH_INSTRUCTIONS)
            .add_tool("solve_issue")
            .add_tool("transfer_to_general")
            .build()
            .unwrap(),
    ]
}
