//! A research -> write -> edit pipeline expressed as a handoff chain: each
//! stage finishes by transferring the thread to the next agent. Requires
//! `OPENAI_API_KEY`.

use std::sync::Arc;

use anyhow::Result;
use swarm_handoff::agent::AgentDefinition;
use swarm_handoff::handoff_router::HandoffRouter;
use swarm_handoff::llm::openai::OpenAiGateway;
use swarm_handoff::session::ConversationSession;
use swarm_handoff::tool::{HandoffTool, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut registry = ToolRegistry::new();
    registry.register_handoff(HandoffTool::new(
        "handoff_to_writer",
        "Pass your research notes on to the writer.",
        "writer",
    ))?;
    registry.register_handoff(HandoffTool::new(
        "handoff_to_editor",
        "Pass the draft on to the editor.",
        "editor",
    ))?;

    let researcher = AgentDefinition::builder("researcher")
        .instructions(
            "You are a researcher. Collect the key facts about the requested \
             topic as short bullet points, state them, then call \
             'handoff_to_writer'.",
        )
        .add_tool("handoff_to_writer")
        .default_entry()
        .build()?;
    let writer = AgentDefinition::builder("writer")
        .instructions(
            "You are a writer. Turn the researcher's notes in this \
             conversation into a short article of two paragraphs, state it, \
             then call 'handoff_to_editor'.",
        )
        .add_tool("handoff_to_editor")
        .build()?;
    let editor = AgentDefinition::builder("editor")
        .instructions(
            "You are an editor. Polish the draft in this conversation for \
             clarity and tone and reply with the final text only.",
        )
        .build()?;

    let router = HandoffRouter::builder()
        .registry(registry)
        .agents(vec![researcher, writer, editor])
        .gateway(Arc::new(OpenAiGateway::from_env()))
        .build()?;
    let session = ConversationSession::new(Arc::new(router));

    let topic = "Write about the benefits of urban beekeeping.";
    println!("User: {topic}\n");
    let receipt = session.send("pipeline", topic).await?;
    println!("Final text (from {}):\n{}", receipt.active_agent, receipt.reply);

    let thread = session.memory().snapshot("pipeline").await.unwrap();
    println!("\nMessages recorded: {}", thread.messages.len());

    Ok(())
}
