use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::{
    agent::AgentId,
    conversation::{ToolCallRequest, ToolResult},
};

pub type ToolHandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("Tool name should be unique, duplicate name: {0}")]
    DuplicateTool(String),
    #[error("Tool not found: {0}")]
    UnknownTool(String),
}

/// A callable tool: name, description, JSON schema of its arguments and an
/// async handler producing textual content.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Value;

    fn call(&self, arguments: Value) -> BoxFuture<'_, Result<String, ToolHandlerError>>;
}

/// Wire-facing description of a tool, as advertised to the completion
/// gateway.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool backed by a closure.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, ToolHandlerError>> + Send + Sync>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolHandlerError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |arguments| Box::pin(handler(arguments))),
        }
    }
}

impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn call(&self, arguments: Value) -> BoxFuture<'_, Result<String, ToolHandlerError>> {
        (self.handler)(arguments)
    }
}

/// A declarative handoff: invoking it transfers the conversation to the
/// target agent. The router intercepts these before dispatch; they never
/// reach a handler.
#[derive(Clone, Debug)]
pub struct HandoffTool {
    name: String,
    description: String,
    target: AgentId,
}

impl HandoffTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        target: impl Into<AgentId>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            target: target.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &AgentId {
        &self.target
    }
}

enum Registered {
    Handler(Arc<dyn Tool>),
    Handoff(HandoffTool),
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolRegistryError> {
        let name = tool.name().to_owned();
        self.insert(name, Registered::Handler(Arc::new(tool)))
    }

    pub fn register_handoff(&mut self, handoff: HandoffTool) -> Result<(), ToolRegistryError> {
        let name = handoff.name.clone();
        self.insert(name, Registered::Handoff(handoff))
    }

    fn insert(&mut self, name: String, tool: Registered) -> Result<(), ToolRegistryError> {
        if self.tools.contains_key(&name) {
            return Err(ToolRegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolves a tool to its wire-facing spec. Handoff tools advertise an
    /// empty-object argument schema.
    pub fn resolve(&self, name: &str) -> Result<ToolSpec, ToolRegistryError> {
        match self.tools.get(name) {
            Some(Registered::Handler(tool)) => Ok(ToolSpec {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameters(),
            }),
            Some(Registered::Handoff(handoff)) => Ok(ToolSpec {
                name: handoff.name.clone(),
                description: handoff.description.clone(),
                parameters: json!({"type": "object", "properties": {}}),
            }),
            None => Err(ToolRegistryError::UnknownTool(name.to_owned())),
        }
    }

    pub fn is_handoff(&self, name: &str) -> bool {
        matches!(self.tools.get(name), Some(Registered::Handoff(_)))
    }

    pub fn handoff_target(&self, name: &str) -> Option<&AgentId> {
        match self.tools.get(name) {
            Some(Registered::Handoff(handoff)) => Some(&handoff.target),
            _ => None,
        }
    }

    pub fn handoffs(&self) -> impl Iterator<Item = &HandoffTool> {
        self.tools.values().filter_map(|tool| match tool {
            Registered::Handoff(handoff) => Some(handoff),
            _ => None,
        })
    }

    /// Invokes a registered tool. Handler failures are data, not control
    /// flow: they come back as a result carrying an error description so the
    /// owning agent can decide how to respond.
    pub async fn invoke(&self, call: &ToolCallRequest) -> ToolResult {
        let content = match self.tools.get(&call.name) {
            Some(Registered::Handler(tool)) => match tool.call(call.arguments.clone()).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("| tool registry | Tool: {} | Error: {} |", call.name, e);
                    format!("Error: tool '{}' failed: {}", call.name, e)
                }
            },
            Some(Registered::Handoff(_)) => {
                format!("Error: '{}' is a handoff, it is routed rather than invoked", call.name)
            }
            None => format!("Error: unknown tool '{}'", call.name),
        };

        ToolResult {
            id: call.id.clone(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> FunctionTool {
        FunctionTool::new(
            "echo",
            "Echoes the input back.",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |arguments| async move {
                let text = arguments
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(format!("echo: {text}"))
            },
        )
    }

    #[test]
    fn test_duplicate_tool_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        assert!(matches!(
            registry.register(echo_tool()),
            Err(ToolRegistryError::DuplicateTool(name)) if name == "echo"
        ));
    }

    #[test]
    fn test_resolve_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(ToolRegistryError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_returns_content() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();

        let call = ToolCallRequest::new("echo", json!({"text": "hi"}));
        let result = registry.invoke(&call).await;
        assert_eq!(result.id, call.id);
        assert_eq!(result.content, "echo: hi");
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_result() {
        let mut registry = ToolRegistry::new();
        registry
            .register(FunctionTool::new(
                "broken",
                "Always fails.",
                json!({"type": "object", "properties": {}}),
                |_| async move { Err(ToolHandlerError::from("boom")) },
            ))
            .unwrap();

        let call = ToolCallRequest::new("broken", json!({}));
        let result = registry.invoke(&call).await;
        assert!(result.content.contains("boom"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_is_data() {
        let registry = ToolRegistry::new();
        let call = ToolCallRequest::new("missing", json!({}));
        let result = registry.invoke(&call).await;
        assert!(result.content.contains("unknown tool"));
    }

    #[test]
    fn test_handoff_registration() {
        let mut registry = ToolRegistry::new();
        registry
            .register_handoff(HandoffTool::new(
                "transfer_to_tech",
                "Transfer to the technical specialist.",
                "tech",
            ))
            .unwrap();

        assert!(registry.is_handoff("transfer_to_tech"));
        assert_eq!(
            registry.handoff_target("transfer_to_tech").unwrap(),
            &AgentId::from("tech")
        );
        let spec = registry.resolve("transfer_to_tech").unwrap();
        assert_eq!(spec.parameters["type"], "object");
        assert_eq!(registry.handoffs().count(), 1);
    }
}
