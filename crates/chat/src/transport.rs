use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout},
    sync::Mutex,
};
use tracing::{debug, info, warn};
use tutorbot_core::CallerId;

use crate::{
    commands::CommandPayload,
    events::{
        default_dispatcher, CallbackEvent, ChatEnvelope, ChatEvent, EventContext,
        EventDispatcher, HandlerResult, PhotoMessageEvent, Sender, TextMessageEvent,
    },
    messages::ReplyMessage,
};

pub const DISPATCH_FAILURE_TEXT: &str =
    "❌ An error occurred while processing your request. Please try again later.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
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
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the stream closed cleanly.
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn deliver(
        &self,
        envelope: &ChatEnvelope,
        reply: &ReplyMessage,
    ) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn deliver(
        &self,
        _envelope: &ChatEnvelope,
        _reply: &ReplyMessage,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Line-oriented transport for local use. Every line comes from one caller:
///
/// ```text
/// /start              command
/// photo ./sum.png     photo message
/// tap demo_quadratic  inline button press
/// what is 2 + 2?      text message
/// ```
pub struct ConsoleTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    sender: Sender,
    sequence: AtomicU64,
}

impl ConsoleTransport<BufReader<Stdin>, Stdout> {
    pub fn stdio(caller_id: CallerId) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), caller_id)
    }
}

impl<R, W> ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, caller_id: CallerId) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            sender: Sender { caller_id, display_name: None },
            sequence: AtomicU64::new(0),
        }
    }

    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }

    fn envelope_for(&self, line: &str) -> ChatEnvelope {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        ChatEnvelope {
            envelope_id: format!("console-{sequence}"),
            event: parse_console_line(line, &self.sender),
        }
    }
}

fn parse_console_line(line: &str, sender: &Sender) -> ChatEvent {
    let chat_id = sender.caller_id.to_string();
    if line.starts_with('/') {
        return ChatEvent::Command(CommandPayload {
            chat_id,
            sender: sender.clone(),
            text: line.to_owned(),
        });
    }
    if let Some(path) = line.strip_prefix("photo ").map(str::trim).filter(|path| !path.is_empty()) {
        return ChatEvent::PhotoMessage(PhotoMessageEvent {
            chat_id,
            sender: sender.clone(),
            image_path: PathBuf::from(path),
        });
    }
    if let Some(data) = line.strip_prefix("tap ").map(str::trim).filter(|data| !data.is_empty()) {
        return ChatEvent::Callback(CallbackEvent {
            chat_id,
            sender: sender.clone(),
            data: data.to_owned(),
        });
    }
    ChatEvent::TextMessage(TextMessageEvent {
        chat_id,
        sender: sender.clone(),
        text: line.to_owned(),
    })
}

fn render_console_reply(reply: &ReplyMessage) -> String {
    let mut rendered = reply.text.trim_end().to_owned();
    for row in &reply.buttons {
        for button in row {
            rendered.push_str(&format!("\n  [{}] tap {}", button.label, button.callback_data));
        }
    }
    rendered.push_str("\n\n");
    rendered
}

#[async_trait]
impl<R, W> ChatTransport for ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "console"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(self.envelope_for(line)));
            }
        }
    }

    async fn deliver(
        &self,
        _envelope: &ChatEnvelope,
        reply: &ReplyMessage,
    ) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(render_console_reply(reply).as_bytes())
            .await
            .map_err(|error| TransportError::Deliver(error.to_string()))?;
        writer.flush().await.map_err(|error| TransportError::Deliver(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

pub struct ChatRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl Default for ChatRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopChatTransport),
            dispatcher: default_dispatcher(),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl ChatRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Pumps envelopes until the transport closes. Connection failures are
    /// retried with backoff; exhausting retries is logged, never returned.
    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.chat.transport_failed",
                        transport = self.transport.name(),
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            event_name = "ingress.chat.retries_exhausted",
                            max_retries = self.reconnect_policy.max_retries,
                            "chat transport retries exhausted; continuing process without crash"
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
        info!(attempt, transport = self.transport.name(), "opening chat transport");
        self.transport.connect().await?;
        info!(attempt, transport = self.transport.name(), "chat transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "chat transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let caller_id = caller_field(&envelope);

            info!(
                event_name = "ingress.chat.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                caller_id = %caller_id,
                "received chat envelope"
            );

            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            let reply = match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(HandlerResult::Responded(reply)) => reply,
                Ok(HandlerResult::Processed | HandlerResult::Ignored) => continue,
                Err(error) => {
                    warn!(
                        event_name = "ingress.chat.dispatch_failed",
                        envelope_id = %envelope.envelope_id,
                        correlation_id = %envelope.envelope_id,
                        caller_id = %caller_id,
                        error = %error,
                        "event dispatch failed; continuing chat loop"
                    );
                    ReplyMessage::plain(DISPATCH_FAILURE_TEXT)
                }
            };

            if let Err(error) = self.transport.deliver(&envelope, &reply).await {
                warn!(
                    event_name = "egress.chat.reply_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    caller_id = %caller_id,
                    error = %error,
                    "failed to deliver chat reply"
                );
            } else {
                debug!(
                    event_name = "egress.chat.reply_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    caller_id = %caller_id,
                    "delivered chat reply"
                );
            }
        }
    }
}

fn caller_field(envelope: &ChatEnvelope) -> String {
    envelope
        .event
        .sender()
        .map(|sender| sender.caller_id.to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tutorbot_core::CallerId;

    use super::{
        ChatRunner, ChatTransport, ConsoleTransport, ReconnectPolicy, TransportError,
        DISPATCH_FAILURE_TEXT,
    };
    use crate::{
        events::{
            default_dispatcher, ChatEnvelope, ChatEvent, EventDispatcher, Sender, TextMessageEvent,
        },
        messages::ReplyMessage,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        connect_attempts: usize,
        deliveries: Vec<(String, ReplyMessage)>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn deliveries(&self) -> Vec<(String, ReplyMessage)> {
            self.state.lock().await.deliveries.clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn deliver(
            &self,
            envelope: &ChatEnvelope,
            reply: &ReplyMessage,
        ) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.deliveries.push((envelope.envelope_id.clone(), reply.clone()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    fn text_envelope(id: &str, text: &str) -> ChatEnvelope {
        ChatEnvelope {
            envelope_id: id.to_owned(),
            event: ChatEvent::TextMessage(TextMessageEvent {
                chat_id: "C1".to_owned(),
                sender: Sender { caller_id: CallerId::from("U1"), display_name: None },
                text: text.to_owned(),
            }),
        }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(text_envelope("env-1", "1 + 1"))), Ok(None)],
        ));

        let runner = ChatRunner::new(
            transport.clone(),
            default_dispatcher(),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        let deliveries = transport.deliveries().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "env-1");
        assert_eq!(transport.state.lock().await.disconnect_calls, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = ChatRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn ignored_events_get_no_reply() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                Ok(Some(ChatEnvelope {
                    envelope_id: "env-2".to_owned(),
                    event: ChatEvent::Unsupported { event_type: "sticker".to_owned() },
                })),
                Ok(None),
            ],
        ));

        let runner = ChatRunner::new(
            transport.clone(),
            default_dispatcher(),
            ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
        );
        runner.start().await.expect("runner");

        assert!(transport.deliveries().await.is_empty());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy { max_retries: 5, base_delay_ms: 250, max_delay_ms: 1_000 };

        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(1).as_millis(), 500);
        assert_eq!(policy.backoff(4).as_millis(), 1_000);
    }

    #[tokio::test]
    async fn console_transport_classifies_lines_and_renders_buttons() {
        let input: &[u8] = b"\n/start\nphoto ./sum.png\ntap demo_fact\nwhat is 2 + 2?\n";
        let transport = ConsoleTransport::new(input, Vec::<u8>::new(), CallerId::from("local"));

        let mut kinds = Vec::new();
        while let Some(envelope) = transport.next_envelope().await.expect("read") {
            kinds.push((envelope.envelope_id.clone(), format!("{:?}", envelope.event.event_type())));
        }
        assert_eq!(
            kinds,
            vec![
                ("console-1".to_owned(), "Command".to_owned()),
                ("console-2".to_owned(), "PhotoMessage".to_owned()),
                ("console-3".to_owned(), "Callback".to_owned()),
                ("console-4".to_owned(), "TextMessage".to_owned()),
            ]
        );

        let envelope = text_envelope("env-3", "hi");
        transport
            .deliver(&envelope, &crate::messages::welcome_message(None))
            .await
            .expect("deliver");
        let written = String::from_utf8(transport.into_writer()).expect("utf8");
        assert!(written.contains("Welcome to Math Tutor Bot, there!"));
        assert!(written.contains("tap demo_quadratic"));
    }

    #[test]
    fn dispatch_failure_text_is_user_safe() {
        assert!(DISPATCH_FAILURE_TEXT.contains("try again later"));
    }
}
