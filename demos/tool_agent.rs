//! A single agent with a calculator and a clock, driven through the session
//! entry point. Requires `OPENAI_API_KEY`.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use swarm_handoff::agent::AgentDefinition;
use swarm_handoff::handoff_router::HandoffRouter;
use swarm_handoff::llm::openai::OpenAiGateway;
use swarm_handoff::session::ConversationSession;
use swarm_handoff::tool::{FunctionTool, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut registry = ToolRegistry::new();
    registry.register(FunctionTool::new(
        "calculator",
        "Evaluates an arithmetic expression. Handles addition, subtraction, multiplication, division and parentheses.",
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '10 + 5 * (8 / 4)'"
                }
            },
            "required": ["expression"],
        }),
        |arguments| async move {
            let expression = arguments
                .get("expression")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            let content = match eval_expression(&expression) {
                Ok(result) => format!("Result: {result}"),
                Err(e) => format!("Error: invalid expression '{expression}': {e}"),
            };
            tracing::info!("| calculator | {} -> {} |", expression, content);
            Ok(content)
        },
    ))?;
    registry.register(FunctionTool::new(
        "current_time",
        "Returns the current time.",
        json!({"type": "object", "properties": {}}),
        |_| async move {
            let time = chrono::Local::now().format("%H:%M:%S").to_string();
            tracing::info!("| current_time | {} |", time);
            Ok(format!("Current time: {time}"))
        },
    ))?;

    let assistant = AgentDefinition::builder("assistant")
        .instructions(
            "You are a helpful assistant. Use 'calculator' for any arithmetic \
             and 'current_time' when asked about the time.",
        )
        .add_tool("calculator")
        .add_tool("current_time")
        .default_entry()
        .build()?;

    let router = HandoffRouter::builder()
        .registry(registry)
        .agent(assistant)
        .gateway(Arc::new(OpenAiGateway::from_env()))
        .build()?;
    let session = ConversationSession::new(Arc::new(router));

    for prompt in [
        "What time is it right now?",
        "How much is 10 + 5 * (8 / 4)?",
    ] {
        println!("User: {prompt}");
        let receipt = session.send("demo", prompt).await?;
        println!("{}: {}\n", receipt.active_agent, receipt.reply);
    }

    Ok(())
}

fn eval_expression(input: &str) -> Result<f64, String> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.pos != parser.bytes.len() {
        return Err(format!("unexpected input at offset {}", parser.pos));
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    value /= self.factor()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expression()?;
                self.skip_whitespace();
                if self.peek() != Some(b')') {
                    return Err("expected ')'".to_owned());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b) if b.is_ascii_digit() || b == b'.' => {
                let start = self.pos;
                while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
                    self.pos += 1;
                }
                std::str::from_utf8(&self.bytes[start..self.pos])
                    .expect("ascii digits")
                    .parse()
                    .map_err(|e| format!("invalid number: {e}"))
            }
            _ => Err("expected a number, '(' or '-'".to_owned()),
        }
    }
}
