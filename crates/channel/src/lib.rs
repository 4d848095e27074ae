//! Channel integration for the concierge bot.
//!
//! - **Events** (`events`) - inbound envelopes, handlers and the dispatcher
//! - **Runner** (`runner`) - transport loop with reconnection and ordered,
//!   per-conversation delivery of outboxes
//! - **Console** (`console`) - stdin/stdout transport for local sessions
//! - **Cards** (`cards`) - Bot Framework attachment JSON and plain-text rendering
//!
//! ```text
//! Transport → ChannelRunner → EventDispatcher → ConversationService (AgentRuntime)
//!                  ↓
//!        per-address lane: sleep(delay) → deliver(activity) ...
//! ```

pub mod cards;
pub mod console;
pub mod events;
pub mod runner;

pub use console::ConsoleTransport;
pub use events::{
    default_dispatcher, ChannelEnvelope, ChannelEvent, ConversationService,
    ConversationStartedEvent, EventDispatcher, HandlerResult,
};
pub use runner::{ChannelRunner, ChannelTransport, NoopTransport, ReconnectPolicy, TransportError};
