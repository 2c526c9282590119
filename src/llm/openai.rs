use std::{collections::HashSet, time::Duration};

use async_openai::{Client, config::OpenAIConfig, error::OpenAIError};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::timeout;

use crate::conversation::{Role, ToolCallRequest};

use super::{CompletionError, CompletionGateway, CompletionRequest, CompletionResult};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat-completions implementation of [`CompletionGateway`].
pub struct OpenAiGateway {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiGateway {
    pub fn builder() -> OpenAiGatewayBuilder {
        OpenAiGatewayBuilder::default()
    }

    /// A gateway configured from the environment (`OPENAI_API_KEY`,
    /// optionally `OPENAI_API_BASE`).
    pub fn from_env() -> Self {
        Self::builder().build()
    }

    fn wire_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(json!({"role": "system", "content": request.instructions}));

        // Correlation ids that a later tool message answers. Handoff calls
        // have no recorded result, so they get a synthetic acknowledgment:
        // providers reject assistant tool calls that are never answered.
        let answered: HashSet<&str> = request
            .history
            .iter()
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();

        for message in &request.history {
            match message.role {
                Role::User => {
                    messages.push(json!({"role": "user", "content": message.content}));
                }
                Role::Agent if message.tool_calls.is_empty() => {
                    messages.push(json!({"role": "assistant", "content": message.content}));
                }
                Role::Agent => {
                    let calls: Vec<Value> = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    messages.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": calls,
                    }));
                    for call in &message.tool_calls {
                        if !answered.contains(call.id.as_str()) {
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": call.id,
                                "content": format!("Transferred via '{}'.", call.name),
                            }));
                        }
                    }
                }
                Role::Tool => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": message.tool_call_id.as_deref().unwrap_or_default(),
                        "content": message.content,
                    }));
                }
            }
        }

        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|spec| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = tools.into();
        }
        body
    }
}

impl CompletionGateway for OpenAiGateway {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<CompletionResult, CompletionError>> {
        Box::pin(async move {
            let body = self.wire_body(&request);
            tracing::debug!(
                "| openai gateway | Model: {} | Messages: {} | Tools: {} |",
                self.model,
                request.history.len(),
                request.tools.len()
            );

            let response: ChatCompletionResponse =
                timeout(self.timeout, self.client.chat().create_byot(body))
                    .await
                    .map_err(|_| CompletionError::Timeout(self.timeout.as_secs()))?
                    .map_err(into_completion_error)?;

            let choice = response.choices.into_iter().next().ok_or_else(|| {
                CompletionError::MalformedResponse("response carries no choices".to_owned())
            })?;

            match choice.message.tool_calls {
                Some(calls) if !calls.is_empty() => {
                    let calls = calls
                        .into_iter()
                        .map(|call| {
                            let arguments =
                                serde_json::from_str(&call.function.arguments).map_err(|e| {
                                    CompletionError::MalformedResponse(format!(
                                        "tool call '{}' carries unparsable arguments: {}",
                                        call.function.name, e
                                    ))
                                })?;
                            Ok(ToolCallRequest::with_id(
                                call.id,
                                call.function.name,
                                arguments,
                            ))
                        })
                        .collect::<Result<Vec<_>, CompletionError>>()?;
                    Ok(CompletionResult::ToolCalls(calls))
                }
                _ => {
                    let content = choice.message.content.ok_or_else(|| {
                        CompletionError::MalformedResponse(
                            "choice carries neither content nor tool calls".to_owned(),
                        )
                    })?;
                    Ok(CompletionResult::Text(content))
                }
            }
        })
    }
}

fn into_completion_error(e: OpenAIError) -> CompletionError {
    match e {
        OpenAIError::ApiError(api) => CompletionError::Provider(api.message),
        OpenAIError::JSONDeserialize(e) => CompletionError::MalformedResponse(e.to_string()),
        other => CompletionError::Transport(other.to_string()),
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunctionCall,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

pub struct OpenAiGatewayBuilder {
    config: OpenAIConfig,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl Default for OpenAiGatewayBuilder {
    fn default() -> Self {
        Self {
            config: OpenAIConfig::default(),
            model: DEFAULT_MODEL.to_owned(),
            temperature: 0.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl OpenAiGatewayBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config = self.config.with_api_key(api_key);
        self
    }

    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.config = self.config.with_api_base(api_base);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> OpenAiGateway {
        OpenAiGateway {
            client: Client::with_config(self.config),
            model: self.model,
            temperature: self.temperature,
            timeout: self.timeout,
        }
    }
}
