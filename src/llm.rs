use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::{
    conversation::{Message, ToolCallRequest},
    tool::ToolSpec,
};

pub mod openai;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Completion timed out after {0}s")]
    Timeout(u64),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
}

/// One request to the completion service: the active agent's instructions,
/// the visible history and the tool specs that agent may use.
#[derive(Clone, Debug, Serialize)]
pub struct CompletionRequest {
    pub instructions: String,
    pub history: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Clone, Debug)]
pub enum CompletionResult {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

/// Boundary to the completion service. Stateless per call: it must be
/// callable repeatedly with a growing history and retains no session state.
pub trait CompletionGateway: Send + Sync {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<CompletionResult, CompletionError>>;
}
