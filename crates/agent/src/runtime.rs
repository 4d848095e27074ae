use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use concierge_core::dialogs::builtin::WELCOME;
use concierge_core::dialogs::{DialogEngine, DialogError, TurnOutput};
use concierge_core::intent::IntentResult;
use concierge_core::outbox::OutboxSink;
use concierge_core::session::{ConversationAddress, InboundMessage, Session};

use crate::classifier::IntentClassifier;
use crate::spell::SpellCorrector;

/// Runs every inbound message through correction, classification and the
/// dialog engine. Turns for the same conversation are serialised; different
/// conversations proceed independently.
pub struct AgentRuntime {
    classifier: Arc<dyn IntentClassifier>,
    corrector: Option<Arc<dyn SpellCorrector>>,
    spell_timeout: Duration,
    engine: Arc<DialogEngine>,
    lanes: Mutex<HashMap<ConversationAddress, Arc<Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(classifier: Arc<dyn IntentClassifier>, engine: Arc<DialogEngine>) -> Self {
        Self {
            classifier,
            corrector: None,
            spell_timeout: Duration::from_millis(1_500),
            engine,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_spell_corrector(
        mut self,
        corrector: Arc<dyn SpellCorrector>,
        timeout: Duration,
    ) -> Self {
        self.corrector = Some(corrector);
        self.spell_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &DialogEngine {
        &self.engine
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    pub async fn handle_message(&self, message: InboundMessage) -> TurnOutput {
        self.serialised_turn(message, None).await
    }

    /// Handles a message, flushing progress to `sink` before any lookup is awaited.
    pub async fn handle_message_with_sink(
        &self,
        message: InboundMessage,
        sink: Arc<dyn OutboxSink>,
    ) -> TurnOutput {
        self.serialised_turn(message, Some(sink)).await
    }

    async fn serialised_turn(
        &self,
        message: InboundMessage,
        sink: Option<Arc<dyn OutboxSink>>,
    ) -> TurnOutput {
        let correlation_id = Uuid::new_v4().to_string();
        let address = message.address.clone();
        let lane = self.lane(&address).await;
        let output = {
            let _turn = lane.lock().await;
            self.run_turn(message, &correlation_id, sink).await
        };
        self.release_lane(&address, lane).await;
        output
    }

    /// Starts the welcome dialog for a conversation the bot was just added to.
    pub async fn begin_conversation(
        &self,
        address: ConversationAddress,
    ) -> Result<TurnOutput, DialogError> {
        let correlation_id = Uuid::new_v4().to_string();
        let lane = self.lane(&address).await;
        let output = {
            let _turn = lane.lock().await;
            let mut session = self.load_session(&address, &correlation_id).await;
            info!(
                event_name = "agent.conversation.started",
                correlation_id = %correlation_id,
                conversation = %address,
                "starting welcome dialog"
            );
            self.engine.begin_dialog(&mut session, WELCOME, &correlation_id).await
        };
        self.release_lane(&address, lane).await;
        output
    }

    async fn run_turn(
        &self,
        mut message: InboundMessage,
        correlation_id: &str,
        sink: Option<Arc<dyn OutboxSink>>,
    ) -> TurnOutput {
        info!(
            event_name = "agent.message.received",
            correlation_id = %correlation_id,
            conversation = %message.address,
            chars = message.text.chars().count(),
            "inbound message received"
        );

        message.text = self.correct(&message.text, correlation_id).await;
        let intent = match self.classifier.classify(&message.text).await {
            Ok(intent) => intent,
            Err(error) => {
                warn!(
                    event_name = "agent.classifier.failed",
                    correlation_id = %correlation_id,
                    conversation = %message.address,
                    classifier = self.classifier.name(),
                    error = %error,
                    "classification failed; treating message as unrecognised"
                );
                IntentResult::none()
            }
        };
        info!(
            event_name = "agent.message.classified",
            correlation_id = %correlation_id,
            conversation = %message.address,
            intent = %intent.intent,
            score = intent.score,
            entities = intent.entities.len(),
            "message classified"
        );

        let mut session = self.load_session(&message.address, correlation_id).await;
        match sink {
            Some(sink) => {
                self.engine
                    .handle_turn_with_sink(&mut session, message, intent, correlation_id, sink)
                    .await
            }
            None => self.engine.handle_turn(&mut session, message, intent, correlation_id).await,
        }
    }

    async fn correct(&self, text: &str, correlation_id: &str) -> String {
        let Some(corrector) = &self.corrector else {
            return text.to_owned();
        };

        match tokio::time::timeout(self.spell_timeout, corrector.correct(text)).await {
            Ok(Ok(corrected)) => corrected,
            Ok(Err(error)) => {
                warn!(
                    event_name = "agent.spell.failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "spell correction failed; using original text"
                );
                text.to_owned()
            }
            Err(_) => {
                warn!(
                    event_name = "agent.spell.timeout",
                    correlation_id = %correlation_id,
                    timeout_ms = self.spell_timeout.as_millis() as u64,
                    "spell correction timed out; using original text"
                );
                text.to_owned()
            }
        }
    }

    async fn load_session(&self, address: &ConversationAddress, correlation_id: &str) -> Session {
        match self.engine.store().load(address).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(address.clone()),
            Err(error) => {
                warn!(
                    event_name = "agent.session.load_failed",
                    correlation_id = %correlation_id,
                    conversation = %address,
                    error = %error,
                    "could not load session; starting a fresh one"
                );
                Session::new(address.clone())
            }
        }
    }

    async fn lane(&self, address: &ConversationAddress) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().await;
        lanes.entry(address.clone()).or_default().clone()
    }

    async fn release_lane(&self, address: &ConversationAddress, lane: Arc<Mutex<()>>) {
        let mut lanes = self.lanes.lock().await;
        drop(lane);
        let idle = lanes.get(address).map(|entry| Arc::strong_count(entry) == 1).unwrap_or(false);
        if idle {
            lanes.remove(address);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use concierge_core::dialogs::builtin::{
        default_registry, DESTINATION_PROMPT, FALLBACK_TEXT, HELP_TEXT,
    };
    use concierge_core::dialogs::{DialogEngine, EngineSettings, FixedClock, TurnRoute};
    use concierge_core::intent::IntentResult;
    use concierge_core::outbox::{Outbox, OutboxSink};
    use concierge_core::session::{ConversationAddress, InboundMessage, SessionStore};
    use concierge_db::{FixtureHotelStore, InMemorySessionRepository};
    use tokio::sync::Notify;

    use super::AgentRuntime;
    use crate::classifier::{ClassifierError, IntentClassifier, KeywordClassifier};
    use crate::spell::{SpellCorrector, SpellError};

    struct FailingClassifier;

    #[async_trait]
    impl IntentClassifier for FailingClassifier {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn classify(&self, _text: &str) -> Result<IntentResult, ClassifierError> {
            Err(ClassifierError::Status { status: 503, body: "busy".to_owned() })
        }
    }

    struct FixedCorrector(&'static str);

    #[async_trait]
    impl SpellCorrector for FixedCorrector {
        async fn correct(&self, _text: &str) -> Result<String, SpellError> {
            Ok(self.0.to_owned())
        }
    }

    struct SlowCorrector;

    #[async_trait]
    impl SpellCorrector for SlowCorrector {
        async fn correct(&self, _text: &str) -> Result<String, SpellError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("never used".to_owned())
        }
    }

    /// Holds the classification of `gated` until released.
    struct GatedClassifier {
        gated: &'static str,
        entered: Notify,
        release: Notify,
        calls: Mutex<Vec<String>>,
        inner: KeywordClassifier,
    }

    impl GatedClassifier {
        fn new(gated: &'static str) -> Self {
            Self {
                gated,
                entered: Notify::new(),
                release: Notify::new(),
                calls: Mutex::default(),
                inner: KeywordClassifier::new(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl IntentClassifier for GatedClassifier {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn classify(&self, text: &str) -> Result<IntentResult, ClassifierError> {
            self.calls.lock().expect("calls lock").push(text.to_owned());
            if text == self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.classify(text).await
        }
    }

    fn runtime_with(
        classifier: Arc<dyn IntentClassifier>,
        store: Arc<InMemorySessionRepository>,
    ) -> AgentRuntime {
        let engine = DialogEngine::new(
            Arc::new(default_registry().expect("registry")),
            Arc::new(FixtureHotelStore::instant()),
            store,
        )
        .with_clock(Arc::new(FixedClock(8)))
        .with_settings(EngineSettings { rng_seed: Some(3), ..EngineSettings::default() });
        AgentRuntime::new(classifier, Arc::new(engine))
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage::new(ConversationAddress::new("conv-rt"), text)
    }

    #[tokio::test]
    async fn conversation_is_persisted_between_messages() {
        let store = Arc::new(InMemorySessionRepository::default());
        let runtime = runtime_with(Arc::new(KeywordClassifier::new()), store.clone());

        let first = runtime.handle_message(message("search hotels")).await;
        assert_eq!(first.outbox.texts().last().copied(), Some(DESTINATION_PROMPT));
        let stored = store
            .load(&ConversationAddress::new("conv-rt"))
            .await
            .expect("load")
            .expect("session saved");
        assert_eq!(stored.stack.depth(), 1);

        let second = runtime.handle_message(message("Lisbon")).await;
        assert!(matches!(second.route, TurnRoute::Resumed { .. }));
        assert_eq!(second.outbox.texts()[0], "Looking for hotels in Lisbon...");
        assert_eq!(second.outbox.texts()[1], "I found 5 hotels:");
        assert_eq!(second.stack_depth, 0);
    }

    #[tokio::test]
    async fn classifier_failure_is_treated_as_unrecognised() {
        let store = Arc::new(InMemorySessionRepository::default());
        let runtime = runtime_with(Arc::new(FailingClassifier), store);

        let output = runtime.handle_message(message("help")).await;

        assert_eq!(output.outbox.texts()[0], FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn corrected_text_is_what_gets_classified() {
        let store = Arc::new(InMemorySessionRepository::default());
        let runtime = runtime_with(Arc::new(KeywordClassifier::new()), store)
            .with_spell_corrector(Arc::new(FixedCorrector("help")), Duration::from_millis(100));

        let output = runtime.handle_message(message("hlep")).await;

        assert_eq!(output.outbox.texts(), vec![HELP_TEXT]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_spell_check_falls_back_to_original_text() {
        let store = Arc::new(InMemorySessionRepository::default());
        let runtime = runtime_with(Arc::new(KeywordClassifier::new()), store)
            .with_spell_corrector(Arc::new(SlowCorrector), Duration::from_millis(50));

        let output = runtime.handle_message(message("help")).await;

        assert_eq!(output.outbox.texts(), vec![HELP_TEXT]);
    }

    #[tokio::test]
    async fn begin_conversation_sends_time_of_day_greeting() {
        let store = Arc::new(InMemorySessionRepository::default());
        let runtime = runtime_with(Arc::new(KeywordClassifier::new()), store);

        let output =
            runtime.begin_conversation(ConversationAddress::new("conv-new")).await.expect("welcome");

        assert_eq!(output.outbox.texts()[0], "Good Morning ! ");
        assert_eq!(output.outbox.texts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_messages_for_one_conversation_are_serialised() {
        let store = Arc::new(InMemorySessionRepository::default());
        let classifier = Arc::new(GatedClassifier::new("search hotels"));
        let runtime = Arc::new(runtime_with(classifier.clone(), store.clone()));
        let address = ConversationAddress::new("conv-rt");

        let first = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.handle_message(message("search hotels")).await })
        };
        classifier.entered.notified().await;
        let second = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.handle_message(message("Oslo")).await })
        };

        // Give the second turn every chance to run ahead of the held one.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(classifier.calls(), vec!["search hotels"]);
        assert!(store.load(&address).await.expect("load").is_none());

        classifier.release.notify_one();
        let first = first.await.expect("first turn");
        let second = second.await.expect("second turn");

        assert_eq!(classifier.calls(), vec!["search hotels", "Oslo"]);
        assert_eq!(first.stack_depth, 1);
        assert!(matches!(second.route, TurnRoute::Resumed { .. }));
        assert_eq!(second.stack_depth, 0);
        assert!(runtime.lanes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn sink_receives_progress_before_the_turn_returns() {
        struct CollectingSink(Mutex<Vec<String>>);

        impl OutboxSink for CollectingSink {
            fn flush(&self, outbox: Outbox) {
                let mut texts = self.0.lock().expect("sink lock");
                texts.extend(outbox.texts().into_iter().map(str::to_owned));
            }
        }

        let store = Arc::new(InMemorySessionRepository::default());
        let runtime = runtime_with(Arc::new(KeywordClassifier::new()), store);
        let sink = Arc::new(CollectingSink(Mutex::default()));

        let output =
            runtime.handle_message_with_sink(message("search hotels in Seattle"), sink.clone()).await;

        let flushed = sink.0.lock().expect("sink lock").clone();
        assert_eq!(flushed.last().map(String::as_str), Some("Looking for hotels in Seattle..."));
        assert_eq!(output.flushed, flushed.len());
        assert_eq!(output.outbox.texts()[0], "I found 5 hotels:");
    }
}
