use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::IntentResult;
use crate::outbox::Outbox;
use crate::search::{LookupRequest, LookupResult};
use crate::session::{DialogData, InboundMessage};

/// Value a step is invoked with.
#[derive(Clone, Debug, PartialEq)]
pub enum StepInput {
    /// First step of a freshly pushed frame.
    Begin { intent: Option<IntentResult>, args: Option<Value> },
    /// Free text: either the user's answer to a prompt or a value chained by `Next`.
    Response(String),
    Lookup(LookupResult),
    ChildEnded(Option<Value>),
}

impl StepInput {
    pub fn begin(intent: Option<IntentResult>) -> Self {
        Self::Begin { intent, args: None }
    }

    pub fn intent(&self) -> Option<&IntentResult> {
        match self {
            Self::Begin { intent, .. } => intent.as_ref(),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Response(text) => Some(text),
            _ => None,
        }
    }
}

/// What a step asks the engine to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Advance the cursor and run the next step right away.
    Next(StepInput),
    /// Send the prompt and suspend until the next inbound message.
    Prompt(String),
    /// Suspend on the external search; the result feeds the next step.
    Lookup(LookupRequest),
    BeginDialog { dialog: String, args: Option<Value> },
    ReplaceDialog { dialog: String, args: Option<Value> },
    /// Pop this frame, handing the value to the parent.
    End(Option<Value>),
    /// Pop every frame.
    EndConversation,
}

impl StepOutcome {
    pub fn end() -> Self {
        Self::End(None)
    }

    pub fn next_with(value: impl Into<String>) -> Self {
        Self::Next(StepInput::Response(value.into()))
    }

    pub fn replace(dialog: impl Into<String>) -> Self {
        Self::ReplaceDialog { dialog: dialog.into(), args: None }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Next(_) => "next",
            Self::Prompt(_) => "prompt",
            Self::Lookup(_) => "lookup",
            Self::BeginDialog { .. } => "begin_dialog",
            Self::ReplaceDialog { .. } => "replace_dialog",
            Self::End(_) => "end",
            Self::EndConversation => "end_conversation",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptDecision {
    /// Keep the active dialog suspended exactly where it is.
    Defer,
    /// Push the newly triggered dialog on top of the active one.
    Proceed,
}

/// Everything a step may touch while it runs.
pub struct StepContext<'a> {
    pub message: &'a InboundMessage,
    pub data: &'a mut DialogData,
    pub outbox: &'a mut Outbox,
    pub rng: &'a mut dyn RngCore,
    /// Local wall-clock hour (0..=23) at the start of the turn.
    pub local_hour: u32,
}

pub type Step = fn(&mut StepContext<'_>, StepInput) -> StepOutcome;

pub type InterruptHandler = fn(&mut StepContext<'_>, &IntentResult) -> InterruptDecision;
