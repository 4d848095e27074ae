use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{
    stdin, stdout, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin,
    Stdout,
};
use tokio::sync::Mutex;

use concierge_core::outbox::Activity;
use concierge_core::session::{ConversationAddress, InboundMessage};

use crate::cards::plain_lines;
use crate::events::{ChannelEnvelope, ChannelEvent, ConversationStartedEvent};
use crate::runner::{ChannelTransport, TransportError};

pub const CONSOLE_ADDRESS: &str = "console";
const CONSOLE_BOT_ID: &str = "concierge";
const CONSOLE_USER_ID: &str = "console-user";

/// Line-oriented local transport: one conversation, each input line is a
/// message, replies are printed as plain text. The first envelope announces
/// the bot joining so the welcome dialog runs.
pub struct ConsoleTransport<R, W> {
    input: Mutex<Lines<BufReader<R>>>,
    output: Mutex<W>,
    address: ConversationAddress,
    announced: AtomicBool,
    sequence: AtomicU64,
}

impl ConsoleTransport<Stdin, Stdout> {
    pub fn stdio() -> Self {
        Self::new(stdin(), stdout())
    }
}

impl<R, W> ConsoleTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(BufReader::new(input).lines()),
            output: Mutex::new(output),
            address: ConversationAddress::new(CONSOLE_ADDRESS),
            announced: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }

    fn next_envelope_id(&self) -> String {
        format!("console-{}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl<R, W> ChannelTransport for ConsoleTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError> {
        if !self.announced.swap(true, Ordering::SeqCst) {
            return Ok(Some(ChannelEnvelope {
                envelope_id: self.next_envelope_id(),
                event: ChannelEvent::ConversationStarted(ConversationStartedEvent {
                    address: self.address.clone(),
                    members_added: vec![CONSOLE_USER_ID.to_owned(), CONSOLE_BOT_ID.to_owned()],
                    bot_id: CONSOLE_BOT_ID.to_owned(),
                }),
            }));
        }

        let mut input = self.input.lock().await;
        loop {
            let line = input
                .next_line()
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            return Ok(Some(ChannelEnvelope::message(
                self.next_envelope_id(),
                InboundMessage::new(self.address.clone(), text),
            )));
        }
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn deliver(
        &self,
        _address: &ConversationAddress,
        activity: &Activity,
    ) -> Result<(), TransportError> {
        let lines = plain_lines(activity);
        if lines.is_empty() {
            return Ok(());
        }
        let mut output = self.output.lock().await;
        for line in lines {
            output
                .write_all(format!("bot> {line}\n").as_bytes())
                .await
                .map_err(|error| TransportError::Deliver(error.to_string()))?;
        }
        output.flush().await.map_err(|error| TransportError::Deliver(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut output = self.output.lock().await;
        output.flush().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}
