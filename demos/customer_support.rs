//! The customer-support swarm: general, technical and billing agents hand a
//! single conversation thread between each other while the thread memory
//! keeps the full context across turns. Requires `OPENAI_API_KEY`.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use swarm_handoff::agent::AgentDefinition;
use swarm_handoff::handoff_router::HandoffRouter;
use swarm_handoff::llm::openai::OpenAiGateway;
use swarm_handoff::session::ConversationSession;
use swarm_handoff::tool::{FunctionTool, HandoffTool, ToolRegistry};

const THREAD_ID: &str = "customer_123";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut registry = ToolRegistry::new();
    registry.register_handoff(HandoffTool::new(
        "transfer_to_tech",
        "Transfer to the technical specialist for application problems.",
        "tech_support",
    ))?;
    registry.register_handoff(HandoffTool::new(
        "transfer_to_billing",
        "Transfer to the billing specialist for account and balance questions.",
        "billing_support",
    ))?;
    registry.register_handoff(HandoffTool::new(
        "transfer_to_general",
        "Return to general support for general questions.",
        "general_support",
    ))?;
    registry.register(FunctionTool::new(
        "solve_tech_issue",
        "Solves a technical issue.",
        json!({
            "type": "object",
            "properties": {
                "issue": {"type": "string", "description": "Description of the technical issue"}
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
    ))?;
    registry.register(FunctionTool::new(
        "check_account",
        "Checks the status and balance of an account.",
        json!({
            "type": "object",
            "properties": {
                "account_id": {"type": "string", "description": "The customer's account id"}
            },
            "required": ["account_id"],
        }),
        |arguments| async move {
            let account_id = arguments
                .get("account_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(format!("Account '{account_id}' status: active. Balance: $15.00."))
        },
    ))?;

    let general = AgentDefinition::builder("general_support")
        .instructions(
            "You are a general support agent. Understand the customer's \
             problem and route them to the right specialist: use \
             'transfer_to_tech' for technical problems and \
             'transfer_to_billing' for billing questions.",
        )
        .add_tool("transfer_to_tech")
        .add_tool("transfer_to_billing")
        .default_entry()
        .build()?;
    let tech = AgentDefinition::builder("tech_support")
        .instructions(
            "You are a technical specialist. Use 'solve_tech_issue' to solve \
             problems. If the customer asks about billing, use \
             'transfer_to_billing'. If the issue is resolved or off-topic, \
             use 'transfer_to_general'.",
        )
        .add_tool("solve_tech_issue")
        .add_tool("transfer_to_billing")
        .add_tool("transfer_to_general")
        .build()?;
    let billing = AgentDefinition::builder("billing_support")
        .instructions(
            "You are a billing specialist. Use 'check_account' to look up \
             account details. For technical questions use 'transfer_to_tech', \
             for anything else 'transfer_to_general'.",
        )
        .add_tool("check_account")
        .add_tool("transfer_to_tech")
        .add_tool("transfer_to_general")
        .build()?;

    let router = HandoffRouter::builder()
        .registry(registry)
        .agents(vec![general, tech, billing])
        .gateway(Arc::new(OpenAiGateway::from_env()))
        .build()?;
    let session = ConversationSession::new(Arc::new(router));

    let turns = [
        "My app is not working",
        "It shows error 500",
        "Thanks! And what's the balance on account my_acc_id?",
        "I want to complain about the service quality",
    ];

    let mut previous_agent = "general_support".to_owned();
    for (number, text) in turns.iter().enumerate() {
        println!("==== Turn {} ====", number + 1);
        println!("Customer: {text}");

        let receipt = session.send(THREAD_ID, *text).await?;
        if receipt.active_agent.as_str() != previous_agent {
            println!("Handoff: {} -> {}", previous_agent, receipt.active_agent);
            previous_agent = receipt.active_agent.as_str().to_owned();
        }
        println!("{}: {}", receipt.active_agent, receipt.reply);

        let thread = session.memory().snapshot(THREAD_ID).await.unwrap();
        println!("Messages in context: {}\n", thread.messages.len());
    }

    Ok(())
}
