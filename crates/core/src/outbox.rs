use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cards::Card;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    Typing,
    Text { text: String },
    Carousel { cards: Vec<Card> },
}

impl Activity {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// One outbound activity plus the pause to observe before sending it,
/// measured from the previous send of the same outbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSend {
    pub delay_ms: u64,
    pub activity: Activity,
}

impl ScheduledSend {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Ordered queue of everything a turn wants to say. Delays are data here;
/// the channel layer drains entries strictly in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Outbox {
    entries: Vec<ScheduledSend>,
    #[serde(skip)]
    pending_delay_ms: u64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typing(&mut self) -> &mut Self {
        self.push(Activity::Typing)
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(Activity::text(text))
    }

    pub fn carousel(&mut self, cards: Vec<Card>) -> &mut Self {
        self.push(Activity::Carousel { cards })
    }

    /// Delays the next queued activity. Consecutive pauses accumulate.
    pub fn pause(&mut self, delay: Duration) -> &mut Self {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.pending_delay_ms = self.pending_delay_ms.saturating_add(millis);
        self
    }

    pub fn push(&mut self, activity: Activity) -> &mut Self {
        let delay_ms = std::mem::take(&mut self.pending_delay_ms);
        self.entries.push(ScheduledSend { delay_ms, activity });
        self
    }

    /// Moves every queued send into a new outbox. A pending pause stays here
    /// and applies to whatever is queued next.
    pub fn take_queued(&mut self) -> Outbox {
        Outbox { entries: std::mem::take(&mut self.entries), pending_delay_ms: 0 }
    }

    pub fn entries(&self) -> &[ScheduledSend] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ScheduledSend> {
        self.entries
    }

    pub fn texts(&self) -> Vec<&str> {
        self.entries.iter().filter_map(|entry| entry.activity.as_text()).collect()
    }

    pub fn total_delay(&self) -> Duration {
        Duration::from_millis(self.entries.iter().map(|entry| entry.delay_ms).sum())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receives the part of a turn's outbox that is ready before the turn ends,
/// e.g. progress text sent ahead of a slow lookup.
pub trait OutboxSink: Send + Sync {
    fn flush(&self, outbox: Outbox);
}
