pub mod audit;
pub mod cards;
pub mod config;
pub mod dialogs;
pub mod domain;
pub mod errors;
pub mod intent;
pub mod outbox;
pub mod search;
pub mod session;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    NoopAuditSink, TracingAuditSink,
};
pub use cards::{Card, CardAction, CardKind, Presentable};
pub use dialogs::{
    default_registry, DialogEngine, DialogError, DialogRegistry, EngineSettings, TurnOutput,
    TurnRoute,
};
pub use domain::{Hotel, HotelId, Review};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use intent::{Entity, IntentResult, NONE_INTENT};
pub use outbox::{Activity, Outbox, OutboxSink, ScheduledSend};
pub use search::{HotelSearch, LookupRequest, LookupResult, SearchError};
pub use session::{
    ConversationAddress, DialogFrame, DialogStack, FrameState, InboundMessage, Session,
    SessionStore, SessionStoreError,
};
