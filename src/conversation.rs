use std::{collections::HashMap, fmt::Display, sync::Arc};

use chrono::Local;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::AgentId;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.pad("user"),
            Role::Agent => f.pad("agent"),
            Role::Tool => f.pad("tool"),
        }
    }
}

/// A tool invocation requested by an agent. The correlation id matches the
/// subsequent [`ToolResult`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    /// A request with a freshly minted correlation id. Provider-issued ids go
    /// through [`ToolCallRequest::with_id`] instead.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, arguments)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
}

/// One entry of a thread's history. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub agent: Option<AgentId>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: i64,
}

impl Message {
    fn new(role: Role, agent: Option<AgentId>, content: String) -> Self {
        Self {
            role,
            agent,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Local::now().timestamp(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, None, content.into())
    }

    pub fn agent_text(agent: AgentId, content: impl Into<String>) -> Self {
        Self::new(Role::Agent, Some(agent), content.into())
    }

    /// The note recording a handoff decision: role `agent`, empty content,
    /// carrying the handoff call itself.
    pub fn handoff(agent: AgentId, call: ToolCallRequest) -> Self {
        let mut message = Self::new(Role::Agent, Some(agent), String::new());
        message.tool_calls = vec![call];
        message
    }

    pub fn tool(agent: AgentId, result: ToolResult) -> Self {
        let mut message = Self::new(Role::Tool, Some(agent), result.content);
        message.tool_call_id = Some(result.id);
        message
    }

    pub fn is_handoff_note(&self) -> bool {
        self.role == Role::Agent && self.content.is_empty() && !self.tool_calls.is_empty()
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let speaker = match &self.agent {
            Some(agent) => format!("{}({})", agent, self.role),
            None => self.role.to_string(),
        };
        write!(f, "{}: {}", speaker, self.content)?;
        for call in &self.tool_calls {
            write!(f, " -> {}({})", call.name, call.arguments)?;
        }
        Ok(())
    }
}

/// A conversation's durable state: append-only history plus the pointer to
/// the agent that takes the next turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub active_agent: AgentId,
    pub messages: Vec<Message>,
}

impl Thread {
    fn new(id: String, active_agent: AgentId) -> Self {
        Self {
            id,
            active_agent,
            messages: Vec::new(),
        }
    }

    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn to_json(&self) -> Result<String, ConversationError> {
        Ok(serde_json::to_string(&self.messages)?)
    }

    /// Count the number of messages by role.
    pub fn count_messages_by_role(&self) -> HashMap<String, usize> {
        let mut count = HashMap::new();
        for message in &self.messages {
            *count.entry(message.role.to_string()).or_insert(0) += 1;
        }
        count
    }
}

impl Display for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for message in &self.messages {
            writeln!(f, "{}", message)?;
        }
        Ok(())
    }
}

/// Process-lifetime store of threads keyed by an opaque id. Distinct thread
/// ids share no mutable state; same-thread access serializes through the
/// per-thread mutex.
#[derive(Default)]
pub struct ThreadMemory {
    threads: DashMap<String, Arc<Mutex<Thread>>>,
}

impl ThreadMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the thread's slot, creating the thread with the given default
    /// agent and empty history on first use. Safe to call concurrently for
    /// distinct thread ids.
    pub fn load(&self, thread_id: &str, default_agent: &AgentId) -> Arc<Mutex<Thread>> {
        self.threads
            .entry(thread_id.to_owned())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Thread::new(
                    thread_id.to_owned(),
                    default_agent.clone(),
                )))
            })
            .value()
            .clone()
    }

    pub fn get(&self, thread_id: &str) -> Option<Arc<Mutex<Thread>>> {
        self.threads.get(thread_id).map(|slot| slot.value().clone())
    }

    /// Atomically appends messages to an existing thread. Returns false if
    /// the thread has not been created yet.
    pub async fn append(&self, thread_id: &str, messages: impl IntoIterator<Item = Message>) -> bool {
        match self.get(thread_id) {
            Some(slot) => {
                slot.lock().await.append(messages);
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self, thread_id: &str) -> Option<Thread> {
        match self.get(thread_id) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_constructors() {
        let user = Message::user("hello");
        assert_eq!(user.role, Role::User);
        assert!(user.agent.is_none());
        assert!(user.tool_calls.is_empty());

        let call = ToolCallRequest::new("transfer_to_tech", json!({}));
        let note = Message::handoff(AgentId::from("general"), call.clone());
        assert!(note.is_handoff_note());
        assert_eq!(note.tool_calls[0].id, call.id);

        let result = Message::tool(
            AgentId::from("tech"),
            ToolResult {
                id: call.id.clone(),
                content: "done".to_owned(),
            },
        );
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
    }

    #[tokio::test]
    async fn test_load_creates_with_default_agent() {
        let memory = ThreadMemory::new();
        let default_agent = AgentId::from("general");

        let slot = memory.load("t1", &default_agent);
        let thread = slot.lock().await;
        assert_eq!(thread.active_agent, default_agent);
        assert!(thread.messages.is_empty());
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let memory = ThreadMemory::new();
        let default_agent = AgentId::from("general");

        {
            let slot = memory.load("t1", &default_agent);
            slot.lock().await.append([Message::user("first")]);
        }
        // A second load must not reset history or the active agent.
        let slot = memory.load("t1", &AgentId::from("other"));
        let thread = slot.lock().await;
        assert_eq!(thread.active_agent, default_agent);
        assert_eq!(thread.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_threads_are_independent() {
        let memory = Arc::new(ThreadMemory::new());
        let default_agent = AgentId::from("general");

        let mut handles = Vec::new();
        for id in ["a", "b", "c"] {
            let memory = Arc::clone(&memory);
            let default_agent = default_agent.clone();
            handles.push(tokio::spawn(async move {
                let slot = memory.load(id, &default_agent);
                let mut thread = slot.lock().await;
                thread.append([Message::user(id)]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for id in ["a", "b", "c"] {
            let thread = memory.snapshot(id).await.unwrap();
            assert_eq!(thread.messages.len(), 1);
            assert_eq!(thread.messages[0].content, id);
        }
    }

    #[tokio::test]
    async fn test_append_requires_existing_thread() {
        let memory = ThreadMemory::new();
        assert!(!memory.append("missing", [Message::user("x")]).await);

        memory.load("t1", &AgentId::from("general"));
        assert!(memory.append("t1", [Message::user("x")]).await);
        assert_eq!(memory.snapshot("t1").await.unwrap().messages.len(), 1);
    }

    #[test]
    fn test_thread_display_and_counts() {
        let mut thread = Thread::new("t1".to_owned(), AgentId::from("general"));
        thread.append([
            Message::user("hi"),
            Message::agent_text(AgentId::from("general"), "hello"),
        ]);

        let rendered = thread.to_string();
        assert!(rendered.contains("user: hi"));
        assert!(rendered.contains("general(agent): hello"));

        let counts = thread.count_messages_by_role();
        assert_eq!(counts["user"], 1);
        assert_eq!(counts["agent"], 1);

        let json = thread.to_json().unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }
}
