use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::{
    agent::{AgentDefinition, AgentId},
    conversation::{Message, ToolCallRequest, ToolResult},
    llm::{CompletionError, CompletionGateway, CompletionRequest, CompletionResult},
    tool::ToolRegistry,
};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Error)]
pub enum RouterBuildError {
    #[error("Agent id should be unique, duplicate id: {0}")]
    DuplicateAgent(AgentId),
    #[error("Agent '{agent}' references unknown tool '{tool}'")]
    UnknownToolReference { agent: AgentId, tool: String },
    #[error("Handoff tool '{tool}' targets unknown agent '{target}'")]
    UnknownHandoffTarget { tool: String, target: AgentId },
    #[error("Exactly one agent must be marked as the default entry, none is")]
    NoDefaultAgent,
    #[error("Exactly one agent must be marked as the default entry, found '{0}' and '{1}'")]
    MultipleDefaultAgents(AgentId, AgentId),
    #[error("A completion gateway must be configured")]
    MissingGateway,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Routing loop exceeded the limit of {limit} iterations")]
    RoutingLoopExceeded { limit: usize },
    #[error("Completion gateway failed: {0}")]
    Gateway(#[from] CompletionError),
}

/// States of one turn. `Running` asks the gateway for the active agent's
/// step; tool requests move to `AwaitingToolResults` (results appended, the
/// same agent reacts next) or `Handoff` (active agent switches, the gateway
/// is consulted again for the new agent); a plain textual reply is `Done`.
#[derive(Debug)]
enum TurnState {
    Running,
    AwaitingToolResults,
    Handoff(AgentId),
    Done(String),
}

/// Everything one turn produced: the final reply, the agent left active and
/// the messages to append to the thread. Warnings record discarded surplus
/// handoff calls.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub active_agent: AgentId,
    pub messages: Vec<Message>,
    pub warnings: Vec<String>,
}

pub struct HandoffRouter {
    agents: HashMap<AgentId, AgentDefinition>,
    default_agent: AgentId,
    registry: ToolRegistry,
    gateway: Arc<dyn CompletionGateway>,
    max_iterations: usize,
}

impl HandoffRouter {
    pub fn builder() -> HandoffRouterBuilder {
        HandoffRouterBuilder::default()
    }

    pub fn default_agent(&self) -> &AgentId {
        &self.default_agent
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Runs one turn for the given history view, starting with the thread's
    /// stored active agent. The history itself is not touched: all new
    /// messages come back in the outcome for the caller to commit.
    pub async fn run(
        &self,
        active_agent: &AgentId,
        history: &[Message],
    ) -> Result<TurnOutcome, RouterError> {
        let mut active = active_agent.clone();
        let mut turn: Vec<Message> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut iterations = 0;
        let mut state = TurnState::Running;

        loop {
            state = match state {
                TurnState::Running => {
                    if iterations == self.max_iterations {
                        return Err(RouterError::RoutingLoopExceeded {
                            limit: self.max_iterations,
                        });
                    }
                    iterations += 1;

                    // Safety: construction validates the default agent and
                    // every handoff target, so `active` is always a member.
                    let agent = self.agents.get(&active).unwrap();
                    let request = CompletionRequest {
                        instructions: agent.instructions().to_owned(),
                        history: history.iter().chain(turn.iter()).cloned().collect(),
                        tools: agent
                            .tools()
                            .iter()
                            .filter_map(|name| self.registry.resolve(name).ok())
                            .collect(),
                    };

                    tracing::debug!(
                        "| handoff router | Agent: {} | Iteration: {} |",
                        active,
                        iterations
                    );
                    match self.gateway.complete(request).await? {
                        CompletionResult::Text(content) => TurnState::Done(content),
                        CompletionResult::ToolCalls(calls) => {
                            self.process_tool_calls(&active, calls, &mut turn, &mut warnings)
                                .await
                        }
                    }
                }
                TurnState::AwaitingToolResults => TurnState::Running,
                TurnState::Handoff(target) => {
                    active = target;
                    TurnState::Running
                }
                TurnState::Done(reply) => {
                    turn.push(Message::agent_text(active.clone(), reply.clone()));
                    return Ok(TurnOutcome {
                        reply,
                        active_agent: active,
                        messages: turn,
                        warnings,
                    });
                }
            };
        }
    }

    /// Resolves one gateway response containing tool calls. Ordinary calls
    /// execute first so their results are already in the history when the
    /// handoff (if any) switches agents; only the first handoff in response
    /// order is honored, the rest are discarded with a recorded warning.
    async fn process_tool_calls(
        &self,
        active: &AgentId,
        calls: Vec<ToolCallRequest>,
        turn: &mut Vec<Message>,
        warnings: &mut Vec<String>,
    ) -> TurnState {
        // Safety: `active` membership is validated at construction.
        let agent = self.agents.get(active).unwrap();
        let permitted =
            |call: &ToolCallRequest| agent.tools().contains(call.name.as_str());
        let is_handoff =
            |call: &ToolCallRequest| permitted(call) && self.registry.is_handoff(&call.name);

        for call in calls.iter().filter(|call| !is_handoff(call)) {
            let result = if permitted(call) {
                self.registry.invoke(call).await
            } else {
                // A name the gateway invented: absorbed as data so the agent
                // can recover in-conversation.
                tracing::warn!(
                    "| handoff router | Agent: {} | Unpermitted tool requested: {} |",
                    active,
                    call.name
                );
                ToolResult {
                    id: call.id.clone(),
                    content: format!("Error: unknown tool '{}'", call.name),
                }
            };
            turn.push(Message::tool(active.clone(), result));
        }

        let mut handoff: Option<ToolCallRequest> = None;
        for call in calls.into_iter().filter(|call| is_handoff(call)) {
            match &handoff {
                None => handoff = Some(call),
                Some(first) => {
                    let warning = format!(
                        "discarded handoff '{}', '{}' was requested first",
                        call.name, first.name
                    );
                    tracing::warn!("| handoff router | Agent: {} | {} |", active, warning);
                    warnings.push(warning);
                }
            }
        }

        match handoff {
            Some(call) => {
                // Safety: build() verified that every handoff targets a
                // member agent.
                let target = self.registry.handoff_target(&call.name).unwrap().clone();
                tracing::info!(
                    "| handoff router | Handoff: {} -> {} | Tool: {} |",
                    active,
                    target,
                    call.name
                );
                turn.push(Message::handoff(active.clone(), call));
                TurnState::Handoff(target)
            }
            None => TurnState::AwaitingToolResults,
        }
    }
}

#[derive(Default)]
pub struct HandoffRouterBuilder {
    agents: Vec<AgentDefinition>,
    registry: ToolRegistry,
    gateway: Option<Arc<dyn CompletionGateway>>,
    max_iterations: Option<usize>,
}

impl HandoffRouterBuilder {
    pub fn agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(self, agents: Vec<AgentDefinition>) -> Self {
        agents
            .into_iter()
            .fold(self, |builder, agent| builder.agent(agent))
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn CompletionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Upper bound on gateway calls per turn, the safety limit against
    /// agent-to-agent bouncing. Defaults to [`DEFAULT_MAX_ITERATIONS`].
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn build(self) -> Result<HandoffRouter, RouterBuildError> {
        let gateway = self.gateway.ok_or(RouterBuildError::MissingGateway)?;

        let mut agents = HashMap::with_capacity(self.agents.len());
        for agent in self.agents {
            let id = agent.id().clone();
            if agents.insert(id.clone(), agent).is_some() {
                return Err(RouterBuildError::DuplicateAgent(id));
            }
        }

        let mut default_agent: Option<AgentId> = None;
        for agent in agents.values() {
            if !agent.is_default() {
                continue;
            }
            match default_agent {
                None => default_agent = Some(agent.id().clone()),
                Some(first) => {
                    return Err(RouterBuildError::MultipleDefaultAgents(
                        first,
                        agent.id().clone(),
                    ));
                }
            }
        }
        let default_agent = default_agent.ok_or(RouterBuildError::NoDefaultAgent)?;

        for agent in agents.values() {
            for tool in agent.tools() {
                if !self.registry.contains(tool) {
                    return Err(RouterBuildError::UnknownToolReference {
                        agent: agent.id().clone(),
                        tool: tool.clone(),
                    });
                }
            }
        }

        for handoff in self.registry.handoffs() {
            if !agents.contains_key(handoff.target()) {
                return Err(RouterBuildError::UnknownHandoffTarget {
                    tool: handoff.name().to_owned(),
                    target: handoff.target().clone(),
                });
            }
        }

        Ok(HandoffRouter {
            agents,
            default_agent,
            registry: self.registry,
            gateway,
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::conversation::Role;
    use crate::test_util::{
        GENERAL_INSTRUCTIONS, TECH_INSTRUCTIONS, ScriptedGateway, support_agents, support_registry,
    };

    use super::*;

    fn support_router(gateway: Arc<ScriptedGateway>) -> HandoffRouter {
        HandoffRouter::builder()
            .registry(support_registry())
            .agents(support_agents())
            .gateway(gateway)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_gateway() {
        let result = HandoffRouter::builder()
            .registry(support_registry())
            .agents(support_agents())
            .build();
        assert!(matches!(result, Err(RouterBuildError::MissingGateway)));
    }

    #[test]
    fn test_build_rejects_duplicate_agent() {
        let agents = support_agents();
        let duplicate = agents[0].clone();
        let result = HandoffRouter::builder()
            .registry(support_registry())
            .agents(agents)
            .agent(duplicate)
            .gateway(Arc::new(ScriptedGateway::new()))
            .build();
        assert!(matches!(result, Err(RouterBuildError::DuplicateAgent(_))));
    }

    #[test]
    fn test_build_rejects_unknown_tool_reference() {
        let agent = AgentDefinition::builder("general")
            .instructions(GENERAL_INSTRUCTIONS)
            .add_tool("does_not_exist")
            .default_entry()
            .build()
            .unwrap();
        let result = HandoffRouter::builder()
            .agent(agent)
            .gateway(Arc::new(ScriptedGateway::new()))
            .build();
        assert!(matches!(
            result,
            Err(RouterBuildError::UnknownToolReference { tool, .. }) if tool == "does_not_exist"
        ));
    }

    #[test]
    fn test_build_rejects_unknown_handoff_target() {
        let agent = AgentDefinition::builder("general")
            .instructions(GENERAL_INSTRUCTIONS)
            .default_entry()
            .build()
            .unwrap();
        let result = HandoffRouter::builder()
            .registry(support_registry())
            .agent(agent)
            .gateway(Arc::new(ScriptedGateway::new()))
            .build();
        assert!(matches!(
            result,
            Err(RouterBuildError::UnknownHandoffTarget { .. })
        ));
    }

    #[test]
    fn test_build_requires_exactly_one_default() {
        let tech_only = AgentDefinition::builder("tech")
            .instructions(TECH_INSTRUCTIONS)
            .build()
            .unwrap();
        let result = HandoffRouter::builder()
            .agent(tech_only)
            .gateway(Arc::new(ScriptedGateway::new()))
            .build();
        assert!(matches!(result, Err(RouterBuildError::NoDefaultAgent)));

        let first = AgentDefinition::builder("a")
            .instructions("You are a.")
            .default_entry()
            .build()
            .unwrap();
        let second = AgentDefinition::builder("b")
            .instructions("You are b.")
            .default_entry()
            .build()
            .unwrap();
        let result = HandoffRouter::builder()
            .agent(first)
            .agent(second)
            .gateway(Arc::new(ScriptedGateway::new()))
            .build();
        assert!(matches!(
            result,
            Err(RouterBuildError::MultipleDefaultAgents(..))
        ));
    }

    #[tokio::test]
    async fn test_plain_text_reply_completes_in_one_iteration() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .script(GENERAL_INSTRUCTIONS, vec![CompletionResult::Text("hi".to_owned())]),
        );
        let router = support_router(Arc::clone(&gateway));

        let history = vec![Message::user("hello")];
        let outcome = router.run(router.default_agent(), &history).await.unwrap();

        assert_eq!(outcome.reply, "hi");
        assert_eq!(outcome.active_agent, AgentId::from("general"));
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].role, Role::Agent);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_handoff_switches_agent_and_instructions() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .script(
                    GENERAL_INSTRUCTIONS,
                    vec![CompletionResult::ToolCalls(vec![ToolCallRequest::new(
                        "transfer_to_tech",
                        json!({}),
                    )])],
                )
                .script(
                    TECH_INSTRUCTIONS,
                    vec![CompletionResult::Text("On it.".to_owned())],
                ),
        );
        let router = support_router(Arc::clone(&gateway));

        let history = vec![Message::user("app broken")];
        let outcome = router.run(router.default_agent(), &history).await.unwrap();

        assert_eq!(outcome.active_agent, AgentId::from("tech"));
        assert_eq!(outcome.messages.len(), 2);
        assert!(outcome.messages[0].is_handoff_note());

        // The gateway call right after the handoff used the target's
        // instructions.
        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].instructions, TECH_INSTRUCTIONS);
    }

    #[tokio::test]
    async fn test_tool_results_feed_next_iteration() {
        let gateway = Arc::new(
            ScriptedGateway::new().script(
                TECH_INSTRUCTIONS,
                vec![
                    CompletionResult::ToolCalls(vec![ToolCallRequest::new(
                        "solve_issue",
                        json!({"issue": "error 500"}),
                    )]),
                    CompletionResult::Text("Fixed.".to_owned()),
                ],
            ),
        );
        let router = support_router(Arc::clone(&gateway));

        let history = vec![Message::user("error 500")];
        let outcome = router
            .run(&AgentId::from("tech"), &history)
            .await
            .unwrap();

        assert_eq!(outcome.reply, "Fixed.");
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[0].role, Role::Tool);
        assert!(outcome.messages[0].content.contains("error 500"));

        // The second gateway call saw the tool result in its history view.
        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert!(
            requests[1]
                .history
                .iter()
                .any(|message| message.role == Role::Tool)
        );
    }

    #[tokio::test]
    async fn test_first_handoff_wins_with_warning() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .script(
                    TECH_INSTRUCTIONS,
                    vec![CompletionResult::ToolCalls(vec![
                        ToolCallRequest::new("transfer_to_general", json!({})),
                        ToolCallRequest::new("transfer_to_tech", json!({})),
                    ])],
                )
                .script(
                    GENERAL_INSTRUCTIONS,
                    vec![CompletionResult::Text("How else can I help?".to_owned())],
                ),
        );
        let router = support_router(gateway);

        let history = vec![Message::user("thanks, one more thing")];
        let outcome = router
            .run(&AgentId::from("tech"), &history)
            .await
            .unwrap();

        assert_eq!(outcome.active_agent, AgentId::from("general"));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("transfer_to_tech"));
    }

    #[tokio::test]
    async fn test_ordinary_tools_execute_before_handoff() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .script(
                    TECH_INSTRUCTIONS,
                    vec![CompletionResult::ToolCalls(vec![
                        ToolCallRequest::new("transfer_to_general", json!({})),
                        ToolCallRequest::new("solve_issue", json!({"issue": "crash"})),
                    ])],
                )
                .script(
                    GENERAL_INSTRUCTIONS,
                    vec![CompletionResult::Text("All done.".to_owned())],
                ),
        );
        let router = support_router(gateway);

        let history = vec![Message::user("crash then goodbye")];
        let outcome = router
            .run(&AgentId::from("tech"), &history)
            .await
            .unwrap();

        // Tool result lands before the handoff note even though the handoff
        // came first in response order.
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.messages[0].role, Role::Tool);
        assert!(outcome.messages[1].is_handoff_note());
        assert_eq!(outcome.active_agent, AgentId::from("general"));
    }

    #[tokio::test]
    async fn test_routing_loop_exceeded() {
        let registry = {
            let mut registry = support_registry();
            registry
                .register_handoff(crate::tool::HandoffTool::new(
                    "transfer_to_self",
                    "Transfer to yourself.",
                    "loopy",
                ))
                .unwrap();
            registry
        };
        let loopy = AgentDefinition::builder("loopy")
            .instructions("You always transfer to yourself.")
            .add_tool("transfer_to_self")
            .default_entry()
            .build()
            .unwrap();
        let bounce = CompletionResult::ToolCalls(vec![ToolCallRequest::new(
            "transfer_to_self",
            json!({}),
        )]);
        let gateway = Arc::new(ScriptedGateway::new().script(
            "You always transfer to yourself.",
            vec![bounce; DEFAULT_MAX_ITERATIONS + 1],
        ));
        let router = HandoffRouter::builder()
            .registry(registry)
            .agents(support_agents().into_iter().map(strip_default).collect())
            .agent(loopy)
            .gateway(gateway)
            .build()
            .unwrap();

        let history = vec![Message::user("hello")];
        let result = router.run(router.default_agent(), &history).await;
        assert!(matches!(
            result,
            Err(RouterError::RoutingLoopExceeded { limit }) if limit == DEFAULT_MAX_ITERATIONS
        ));
    }

    #[tokio::test]
    async fn test_unpermitted_tool_is_absorbed_as_data() {
        let gateway = Arc::new(
            ScriptedGateway::new().script(
                GENERAL_INSTRUCTIONS,
                vec![
                    CompletionResult::ToolCalls(vec![ToolCallRequest::new(
                        "solve_issue",
                        json!({"issue": "x"}),
                    )]),
                    CompletionResult::Text("Sorry about that.".to_owned()),
                ],
            ),
        );
        let router = support_router(gateway);

        // `solve_issue` exists in the registry but is not in general's
        // subset: the call resolves to an error-string result.
        let history = vec![Message::user("fix it yourself")];
        let outcome = router.run(router.default_agent(), &history).await.unwrap();

        assert_eq!(outcome.reply, "Sorry about that.");
        assert_eq!(outcome.messages[0].role, Role::Tool);
        assert!(outcome.messages[0].content.contains("unknown tool"));
        assert_eq!(outcome.active_agent, AgentId::from("general"));
    }

    fn strip_default(agent: AgentDefinition) -> AgentDefinition {
        let mut builder = AgentDefinition::builder(agent.id().clone())
            .instructions(agent.instructions().to_owned());
        for tool in agent.tools() {
            builder = builder.add_tool(tool.clone());
        }
        builder.build().unwrap()
    }
}
