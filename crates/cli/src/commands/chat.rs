use std::sync::Arc;

use anyhow::Context;
use concierge_agent::{AgentRuntime, KeywordClassifier};
use concierge_channel::cards::{wire_activity, WireActivity};
use concierge_core::dialogs::{
    default_registry, DialogEngine, EngineSettings, FixedClock, TurnOutput, TurnRoute,
};
use concierge_core::session::{ConversationAddress, InboundMessage};
use concierge_db::{FixtureHotelStore, InMemorySessionRepository};
use serde::Serialize;

use crate::commands::CommandResult;

const CHAT_ADDRESS: &str = "cli-chat";

#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub messages: Vec<String>,
    pub seed: Option<u64>,
    pub hour: Option<u32>,
    pub welcome: bool,
}

#[derive(Debug, Serialize)]
struct Transcript {
    command: &'static str,
    status: &'static str,
    conversation: String,
    turns: Vec<TranscriptTurn>,
}

#[derive(Debug, Serialize)]
struct TranscriptTurn {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    route: String,
    stack_depth: usize,
    persisted: bool,
    replies: Vec<TranscriptReply>,
}

#[derive(Debug, Serialize)]
struct TranscriptReply {
    delay_ms: u64,
    activity: WireActivity,
}

/// Runs the built-in dialogs offline: keyword classifier, in-memory sessions
/// and instant fixture search. Delays are reported, not slept.
pub fn run(options: ChatOptions) -> CommandResult {
    if options.hour.is_some_and(|hour| hour > 23) {
        return CommandResult::failure("chat", "invalid_argument", "--hour must be in 0..=23", 2);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(converse(&options)) {
        Ok(turns) => {
            let transcript = Transcript {
                command: "chat",
                status: "ok",
                conversation: CHAT_ADDRESS.to_string(),
                turns,
            };
            match serde_json::to_string_pretty(&transcript) {
                Ok(output) => CommandResult { exit_code: 0, output },
                Err(error) => CommandResult::failure("chat", "serialization", error.to_string(), 4),
            }
        }
        Err(error) => CommandResult::failure("chat", "conversation", format!("{error:#}"), 5),
    }
}

async fn converse(options: &ChatOptions) -> anyhow::Result<Vec<TranscriptTurn>> {
    let registry = default_registry().context("built-in dialogs failed to register")?;
    let mut engine = DialogEngine::new(
        Arc::new(registry),
        Arc::new(FixtureHotelStore::instant()),
        Arc::new(InMemorySessionRepository::default()),
    )
    .with_settings(EngineSettings { rng_seed: options.seed, ..EngineSettings::default() });
    if let Some(hour) = options.hour {
        engine = engine.with_clock(Arc::new(FixedClock(hour)));
    }
    let agent = AgentRuntime::new(Arc::new(KeywordClassifier::new()), Arc::new(engine));

    let address = ConversationAddress::new(CHAT_ADDRESS);
    let mut turns = Vec::with_capacity(options.messages.len() + 1);
    if options.welcome {
        let output = agent
            .begin_conversation(address.clone())
            .await
            .context("welcome dialog failed to start")?;
        turns.push(transcript_turn(None, output));
    }
    for text in &options.messages {
        let message = InboundMessage::new(address.clone(), text.as_str());
        let output = agent.handle_message(message).await;
        turns.push(transcript_turn(Some(text.clone()), output));
    }

    Ok(turns)
}

fn transcript_turn(user: Option<String>, output: TurnOutput) -> TranscriptTurn {
    TranscriptTurn {
        user,
        route: describe_route(&output.route),
        stack_depth: output.stack_depth,
        persisted: output.persisted,
        replies: output
            .outbox
            .entries()
            .iter()
            .map(|send| TranscriptReply {
                delay_ms: send.delay_ms,
                activity: wire_activity(&send.activity),
            })
            .collect(),
    }
}

fn describe_route(route: &TurnRoute) -> String {
    match route {
        TurnRoute::Started { dialog } => format!("started {dialog}"),
        TurnRoute::Resumed { dialog } => format!("resumed {dialog}"),
        TurnRoute::Deferred { active, triggered } => {
            format!("{triggered} deferred while {active} is active")
        }
        TurnRoute::Interrupted { active, triggered } => {
            format!("{triggered} interrupted {active}")
        }
    }
}
