use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use concierge_core::outbox::{Activity, Outbox};
use concierge_core::session::ConversationAddress;

use crate::events::{
    ChannelEnvelope, DispatchError, EventContext, EventDispatcher, HandlerResult, ProgressSender,
};

const DEFAULT_LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport delivery failed: {0}")]
    Deliver(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn deliver(
        &self,
        address: &ConversationAddress,
        activity: &Activity,
    ) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl ChannelTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn deliver(
        &self,
        _address: &ConversationAddress,
        _activity: &Activity,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pulls envelopes from a transport, runs them through the dispatcher and
/// delivers each resulting outbox. Envelopes for the same conversation are
/// handled one after another on a dedicated lane; distinct conversations run
/// concurrently. A lane with nothing to do for `lane_idle_timeout` exits and
/// is replaced on the conversation's next envelope.
pub struct ChannelRunner {
    transport: Arc<dyn ChannelTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
    simulate_typing: bool,
    lane_idle_timeout: Duration,
}

impl Default for ChannelRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopTransport),
            dispatcher: Arc::new(EventDispatcher::default()),
            reconnect_policy: ReconnectPolicy::default(),
            simulate_typing: true,
            lane_idle_timeout: DEFAULT_LANE_IDLE_TIMEOUT,
        }
    }
}

impl ChannelRunner {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            reconnect_policy,
            simulate_typing: true,
            lane_idle_timeout: DEFAULT_LANE_IDLE_TIMEOUT,
        }
    }

    pub fn with_lane_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.lane_idle_timeout = idle_timeout;
        self
    }

    /// When disabled, outbox delays are skipped but send order is kept.
    pub fn with_simulate_typing(mut self, simulate_typing: bool) -> Self {
        self.simulate_typing = simulate_typing;
        self
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "channel transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "channel retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening channel transport connection");
        self.transport.connect().await?;
        info!(attempt, "channel transport connected");

        let mut lanes: HashMap<ConversationAddress, Lane> = HashMap::new();
        let mut lane_tasks = JoinSet::new();

        let outcome = loop {
            let envelope = match self.transport.next_envelope().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break Ok(()),
                Err(error) => break Err(error),
            };

            info!(
                event_name = "ingress.channel.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                conversation = envelope.address().map(ConversationAddress::as_str).unwrap_or("unknown"),
                "received channel envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.channel.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge channel envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.channel.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged channel envelope"
                );
            }

            reap_lanes(&mut lanes, &mut lane_tasks);

            let Some(address) = envelope.address().cloned() else {
                process_envelope(
                    self.transport.as_ref(),
                    &self.dispatcher,
                    envelope,
                    self.simulate_typing,
                )
                .await;
                continue;
            };

            let envelope = match lanes.get(&address) {
                Some(lane) => match lane.sender.send(envelope) {
                    Ok(()) => continue,
                    Err(rejected) => rejected.0,
                },
                None => envelope,
            };

            // The lane for this address is new or has retired; a retiring lane
            // still finishes what it queued before the replacement starts.
            let predecessor = lanes.remove(&address).map(|lane| lane.finished);
            let (sender, receiver) = mpsc::unbounded_channel();
            let (finished_tx, finished) = oneshot::channel();
            lane_tasks.spawn(run_lane(
                LaneContext {
                    transport: self.transport.clone(),
                    dispatcher: self.dispatcher.clone(),
                    simulate_typing: self.simulate_typing,
                    idle_timeout: self.lane_idle_timeout,
                },
                address.clone(),
                receiver,
                predecessor,
                finished_tx,
            ));
            if sender.send(envelope).is_err() {
                warn!(
                    event_name = "channel.lane.closed",
                    conversation = %address,
                    "conversation lane closed before its first envelope; dropping envelope"
                );
            }
            lanes.insert(address, Lane { sender, finished });
        };

        // Closing the senders lets every lane drain what it already queued.
        drop(lanes);
        while let Some(joined) = lane_tasks.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "conversation lane task failed");
            }
        }

        outcome?;
        info!(attempt, "channel transport stream closed");
        self.transport.disconnect().await
    }
}

struct Lane {
    sender: mpsc::UnboundedSender<ChannelEnvelope>,
    /// Resolves (with an error) once the lane task has exited.
    finished: oneshot::Receiver<()>,
}

impl Lane {
    fn is_retired(&mut self) -> bool {
        self.sender.is_closed()
            && matches!(self.finished.try_recv(), Err(oneshot::error::TryRecvError::Closed))
    }
}

struct LaneContext {
    transport: Arc<dyn ChannelTransport>,
    dispatcher: Arc<EventDispatcher>,
    simulate_typing: bool,
    idle_timeout: Duration,
}

/// Drops lanes whose task has exited and collects their join results.
fn reap_lanes(lanes: &mut HashMap<ConversationAddress, Lane>, lane_tasks: &mut JoinSet<()>) {
    lanes.retain(|_, lane| !lane.is_retired());
    while let Some(joined) = lane_tasks.try_join_next() {
        if let Err(error) = joined {
            warn!(error = %error, "conversation lane task failed");
        }
    }
}

async fn run_lane(
    lane: LaneContext,
    address: ConversationAddress,
    mut receiver: mpsc::UnboundedReceiver<ChannelEnvelope>,
    predecessor: Option<oneshot::Receiver<()>>,
    _finished: oneshot::Sender<()>,
) {
    if let Some(predecessor) = predecessor {
        // Only the sender being dropped resolves this.
        predecessor.await.ok();
    }

    loop {
        match tokio::time::timeout(lane.idle_timeout, receiver.recv()).await {
            Ok(Some(envelope)) => {
                process_envelope(
                    lane.transport.as_ref(),
                    &lane.dispatcher,
                    envelope,
                    lane.simulate_typing,
                )
                .await;
            }
            Ok(None) => return,
            Err(_) => break,
        }
    }

    debug!(
        event_name = "channel.lane.retired",
        conversation = %address,
        idle_ms = lane.idle_timeout.as_millis() as u64,
        "retiring idle conversation lane"
    );
    receiver.close();
    while let Some(envelope) = receiver.recv().await {
        process_envelope(lane.transport.as_ref(), &lane.dispatcher, envelope, lane.simulate_typing)
            .await;
    }
}

/// Dispatches one envelope. Sends the turn flushes early are delivered while
/// the turn is still running; the final outbox follows them.
async fn process_envelope(
    transport: &dyn ChannelTransport,
    dispatcher: &EventDispatcher,
    envelope: ChannelEnvelope,
    simulate_typing: bool,
) {
    let correlation_id = envelope.envelope_id.clone();
    let address = envelope.address().cloned();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Outbox>();
    let context = EventContext::new(correlation_id.clone()).with_progress(ProgressSender::new(progress_tx));

    let turn = async move {
        let result = dispatcher.dispatch(&envelope, &context).await;
        drop(context);
        result
    };
    let early = async {
        while let Some(outbox) = progress_rx.recv().await {
            if let Some(address) = &address {
                deliver_outbox(transport, address, outbox, simulate_typing, &correlation_id).await;
            }
        }
    };
    let (result, ()) = tokio::join!(turn, early);

    match result {
        Ok(HandlerResult::Responded(outbox)) => {
            if let Some(address) = &address {
                deliver_outbox(transport, address, outbox, simulate_typing, &correlation_id).await;
            }
        }
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
        Err(DispatchError::Handler(error)) => {
            warn!(
                correlation_id = %correlation_id,
                error = %error,
                "event dispatch failed; continuing channel loop"
            );
            if let Some(address) = &address {
                let mut apology = Outbox::new();
                apology.text(error.user_message());
                deliver_outbox(transport, address, apology, simulate_typing, &correlation_id).await;
            }
        }
    }
}

/// Sends every entry in order, sleeping for each entry's delay first.
pub async fn deliver_outbox(
    transport: &dyn ChannelTransport,
    address: &ConversationAddress,
    outbox: Outbox,
    simulate_typing: bool,
    correlation_id: &str,
) {
    let total = outbox.len();
    for (index, send) in outbox.into_entries().into_iter().enumerate() {
        if simulate_typing && send.delay_ms > 0 {
            tokio::time::sleep(send.delay()).await;
        }
        if let Err(error) = transport.deliver(address, &send.activity).await {
            warn!(
                event_name = "egress.channel.deliver_failed",
                correlation_id = %correlation_id,
                conversation = %address,
                index,
                error = %error,
                "failed to deliver activity"
            );
        }
    }
    debug!(
        event_name = "egress.channel.outbox_delivered",
        correlation_id = %correlation_id,
        conversation = %address,
        activities = total,
        "outbox delivered"
    );
}
