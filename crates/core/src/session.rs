use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::search::LookupRequest;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationAddress(pub String);

impl ConversationAddress {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub address: ConversationAddress,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(address: ConversationAddress, text: impl Into<String>) -> Self {
        Self { address, text: text.into(), received_at: Utc::now() }
    }
}

/// Scratch values private to one dialog frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogData(BTreeMap<String, Value>);

impl DialogData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FrameState {
    #[default]
    Pending,
    AwaitingInput {
        prompt: String,
    },
    AwaitingLookup {
        request: LookupRequest,
    },
    AwaitingChild,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DialogFrame {
    pub dialog: String,
    /// Index of the next step to run.
    pub cursor: usize,
    pub state: FrameState,
    pub data: DialogData,
}

impl DialogFrame {
    pub fn new(dialog: impl Into<String>) -> Self {
        Self {
            dialog: dialog.into(),
            cursor: 0,
            state: FrameState::Pending,
            data: DialogData::default(),
        }
    }

    pub fn is_awaiting_input(&self) -> bool {
        matches!(self.state, FrameState::AwaitingInput { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogStack {
    frames: Vec<DialogFrame>,
}

impl DialogStack {
    pub fn push(&mut self, frame: DialogFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<DialogFrame> {
        self.frames.pop()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn top(&self) -> Option<&DialogFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut DialogFrame> {
        self.frames.last_mut()
    }

    pub fn frames(&self) -> &[DialogFrame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub address: ConversationAddress,
    pub stack: DialogStack,
    pub last_message: Option<InboundMessage>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(address: ConversationAddress) -> Self {
        Self { address, stack: DialogStack::default(), last_message: None, updated_at: Utc::now() }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored session for `{address}` could not be decoded: {reason}")]
    Corrupt { address: String, reason: String },
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(
        &self,
        address: &ConversationAddress,
    ) -> Result<Option<Session>, SessionStoreError>;
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ConversationAddress, DialogFrame, DialogStack, FrameState, InboundMessage, Session,
    };
    use crate::search::LookupRequest;

    #[test]
    fn stack_push_pop_tracks_top() {
        let mut stack = DialogStack::default();
        stack.push(DialogFrame::new("SearchHotels"));
        stack.push(DialogFrame::new("Help"));

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().map(|frame| frame.dialog.as_str()), Some("Help"));
        assert_eq!(stack.pop().map(|frame| frame.dialog), Some("Help".to_owned()));
        assert_eq!(stack.top().map(|frame| frame.dialog.as_str()), Some("SearchHotels"));
    }

    #[test]
    fn frame_data_is_scoped_to_its_frame() {
        let mut stack = DialogStack::default();
        let mut parent = DialogFrame::new("parent");
        parent.data.set("searchType", "city");
        stack.push(parent);
        stack.push(DialogFrame::new("child"));

        let child = stack.top().expect("child frame");
        assert!(child.data.get_str("searchType").is_none());
        assert_eq!(stack.frames()[0].data.get_str("searchType"), Some("city"));
    }

    #[test]
    fn session_serializes_with_every_frame_state() {
        let mut session = Session::new(ConversationAddress::new("conv-1"));
        let mut awaiting = DialogFrame::new("SearchHotels");
        awaiting.cursor = 1;
        awaiting.state = FrameState::AwaitingInput { prompt: "Please enter your destination".into() };
        awaiting.data.set("attempts", json!(2));
        let mut lookup = DialogFrame::new("ShowHotelsReviews");
        lookup.state = FrameState::AwaitingLookup {
            request: LookupRequest::Reviews { hotel_name: "The Bot Resort".into() },
        };
        let mut parent = DialogFrame::new("None");
        parent.state = FrameState::AwaitingChild;
        session.stack.push(parent);
        session.stack.push(awaiting);
        session.stack.push(lookup);
        session.last_message =
            Some(InboundMessage::new(ConversationAddress::new("conv-1"), "search hotels"));

        let encoded = serde_json::to_string(&session).expect("encode session");
        let decoded: Session = serde_json::from_str(&encoded).expect("decode session");

        assert_eq!(decoded, session);
    }
}
