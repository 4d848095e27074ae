use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use concierge_agent::AgentRuntime;
use concierge_core::errors::{ApplicationError, DomainError, InterfaceError};
use concierge_core::outbox::{Outbox, OutboxSink};
use concierge_core::session::{ConversationAddress, InboundMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEnvelope {
    pub envelope_id: String,
    pub event: ChannelEvent,
}

impl ChannelEnvelope {
    pub fn message(envelope_id: impl Into<String>, message: InboundMessage) -> Self {
        Self { envelope_id: envelope_id.into(), event: ChannelEvent::MessageReceived(message) }
    }

    /// The conversation this envelope belongs to, if any.
    pub fn address(&self) -> Option<&ConversationAddress> {
        match &self.event {
            ChannelEvent::MessageReceived(message) => Some(&message.address),
            ChannelEvent::ConversationStarted(event) => Some(&event.address),
            ChannelEvent::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    MessageReceived(InboundMessage),
    ConversationStarted(ConversationStartedEvent),
    Unsupported { event_type: String },
}

impl ChannelEvent {
    pub fn event_type(&self) -> ChannelEventType {
        match self {
            Self::MessageReceived(_) => ChannelEventType::MessageReceived,
            Self::ConversationStarted(_) => ChannelEventType::ConversationStarted,
            Self::Unsupported { .. } => ChannelEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelEventType {
    MessageReceived,
    ConversationStarted,
    Unsupported,
}

/// Members joined a conversation. Only interesting when the bot is one of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationStartedEvent {
    pub address: ConversationAddress,
    pub members_added: Vec<String>,
    pub bot_id: String,
}

impl ConversationStartedEvent {
    pub fn includes_bot(&self) -> bool {
        self.members_added.iter().any(|member| member == &self.bot_id)
    }
}

#[derive(Clone, Debug)]
pub struct EventContext {
    pub correlation_id: String,
    /// Where a turn sends what it has ready before it finishes.
    pub progress: Option<ProgressSender>,
}

impl EventContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::new("unknown-correlation-id")
    }
}

/// Feeds early sends into the conversation lane that is running the turn.
#[derive(Clone, Debug)]
pub struct ProgressSender(mpsc::UnboundedSender<Outbox>);

impl ProgressSender {
    pub fn new(sender: mpsc::UnboundedSender<Outbox>) -> Self {
        Self(sender)
    }
}

impl OutboxSink for ProgressSender {
    fn flush(&self, outbox: Outbox) {
        if self.0.send(outbox).is_err() {
            debug!(
                event_name = "channel.progress.dropped",
                "conversation lane stopped before progress could be delivered"
            );
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HandlerResult {
    Responded(Outbox),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("conversation handler failure: {0}")]
    Conversation(#[from] InterfaceError),
}

impl EventHandlerError {
    /// Text that is safe to show the person on the other end.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Conversation(error) => error.user_message(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChannelEventType;
    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChannelEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChannelEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// What the channel needs from the conversational core.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn handle_message(
        &self,
        message: InboundMessage,
        ctx: &EventContext,
    ) -> Result<Outbox, EventHandlerError>;

    async fn begin_conversation(
        &self,
        address: ConversationAddress,
        ctx: &EventContext,
    ) -> Result<Outbox, EventHandlerError>;
}

#[async_trait]
impl ConversationService for AgentRuntime {
    async fn handle_message(
        &self,
        message: InboundMessage,
        ctx: &EventContext,
    ) -> Result<Outbox, EventHandlerError> {
        let address = message.address.clone();
        let output = match &ctx.progress {
            Some(progress) => self.handle_message_with_sink(message, Arc::new(progress.clone())).await,
            None => AgentRuntime::handle_message(self, message).await,
        };
        if !output.persisted {
            warn!(
                event_name = "channel.turn.not_persisted",
                correlation_id = %ctx.correlation_id,
                conversation = %address,
                "turn completed but the session was not saved"
            );
        }
        Ok(output.outbox)
    }

    async fn begin_conversation(
        &self,
        address: ConversationAddress,
        ctx: &EventContext,
    ) -> Result<Outbox, EventHandlerError> {
        AgentRuntime::begin_conversation(self, address)
            .await
            .map(|output| output.outbox)
            .map_err(|error| {
                ApplicationError::from(DomainError::from(error))
                    .into_interface(ctx.correlation_id.clone())
                    .into()
            })
    }
}

pub fn default_dispatcher(service: Arc<dyn ConversationService>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(service.clone()));
    dispatcher.register(ConversationStartedHandler::new(service));
    dispatcher
}

pub struct MessageHandler {
    service: Arc<dyn ConversationService>,
}

impl MessageHandler {
    pub fn new(service: Arc<dyn ConversationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    fn event_type(&self) -> ChannelEventType {
        ChannelEventType::MessageReceived
    }

    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChannelEvent::MessageReceived(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let outbox = self.service.handle_message(message.clone(), ctx).await?;
        Ok(if outbox.is_empty() { HandlerResult::Processed } else { HandlerResult::Responded(outbox) })
    }
}

pub struct ConversationStartedHandler {
    service: Arc<dyn ConversationService>,
}

impl ConversationStartedHandler {
    pub fn new(service: Arc<dyn ConversationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for ConversationStartedHandler {
    fn event_type(&self) -> ChannelEventType {
        ChannelEventType::ConversationStarted
    }

    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChannelEvent::ConversationStarted(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !event.includes_bot() {
            return Ok(HandlerResult::Processed);
        }

        info!(
            event_name = "channel.conversation.bot_added",
            correlation_id = %ctx.correlation_id,
            conversation = %event.address,
            "bot added to conversation"
        );
        let outbox = self.service.begin_conversation(event.address.clone(), ctx).await?;
        Ok(HandlerResult::Responded(outbox))
    }
}
