use std::sync::Arc;

use thiserror::Error;

use crate::{
    agent::AgentId,
    conversation::{Message, ThreadMemory},
    handoff_router::{HandoffRouter, RouterError},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Thread '{0}' is busy with another send")]
    ThreadBusy(String),
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// What a second `send` on an already busy thread does: wait its turn
/// (natural conversational turn-taking) or fail fast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentionPolicy {
    #[default]
    Queue,
    Reject,
}

/// What the caller gets back from a completed turn.
#[derive(Clone, Debug)]
pub struct TurnReceipt {
    pub reply: String,
    pub active_agent: AgentId,
    pub warnings: Vec<String>,
}

/// Orchestration entry point: accepts a user message for a thread id,
/// drives the router and commits the turn to [`ThreadMemory`].
pub struct ConversationSession {
    router: Arc<HandoffRouter>,
    memory: ThreadMemory,
    policy: ContentionPolicy,
}

impl ConversationSession {
    pub fn new(router: Arc<HandoffRouter>) -> Self {
        Self::with_policy(router, ContentionPolicy::default())
    }

    pub fn with_policy(router: Arc<HandoffRouter>, policy: ContentionPolicy) -> Self {
        Self {
            router,
            memory: ThreadMemory::new(),
            policy,
        }
    }

    pub fn memory(&self) -> &ThreadMemory {
        &self.memory
    }

    /// Runs one turn. The commit is all-or-nothing: on any router failure
    /// (or if the returned future is dropped mid-turn) the thread keeps its
    /// prior history, user message included.
    pub async fn send(
        &self,
        thread_id: &str,
        user_text: impl Into<String>,
    ) -> Result<TurnReceipt, SessionError> {
        let slot = self.memory.load(thread_id, self.router.default_agent());
        let mut thread = match self.policy {
            ContentionPolicy::Queue => slot.lock().await,
            ContentionPolicy::Reject => slot
                .try_lock()
                .map_err(|_| SessionError::ThreadBusy(thread_id.to_owned()))?,
        };

        let user = Message::user(user_text);
        let mut view = thread.messages.clone();
        view.push(user.clone());

        let outcome = match self.router.run(&thread.active_agent, &view).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("| session | Thread: {} | Error: {} |", thread_id, e);
                return Err(e.into());
            }
        };

        thread.append(std::iter::once(user).chain(outcome.messages));
        thread.active_agent = outcome.active_agent.clone();

        tracing::info!(
            "| session | Thread: {} | Active agent: {} | Messages: {} |",
            thread_id,
            thread.active_agent,
            thread.messages.len()
        );

        Ok(TurnReceipt {
            reply: outcome.reply,
            active_agent: outcome.active_agent,
            warnings: outcome.warnings,
        })
    }
}
