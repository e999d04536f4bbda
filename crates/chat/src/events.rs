use std::{collections::HashMap, path::Path, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tutorbot_core::CallerId;

use crate::{
    commands::{
        normalize_command, CommandParseError, CommandPayload, CommandRouter, CommandService,
        NoopCommandService,
    },
    messages::{self, ReplyMessage},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Command(CommandPayload),
    TextMessage(TextMessageEvent),
    PhotoMessage(PhotoMessageEvent),
    Callback(CallbackEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Command(_) => ChatEventType::Command,
            Self::TextMessage(_) => ChatEventType::TextMessage,
            Self::PhotoMessage(_) => ChatEventType::PhotoMessage,
            Self::Callback(_) => ChatEventType::Callback,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match self {
            Self::Command(payload) => Some(&payload.sender),
            Self::TextMessage(event) => Some(&event.sender),
            Self::PhotoMessage(event) => Some(&event.sender),
            Self::Callback(event) => Some(&event.sender),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Command,
    TextMessage,
    PhotoMessage,
    Callback,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub caller_id: CallerId,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub chat_id: String,
    pub sender: Sender,
    pub text: String,
}

/// A photo the transport has already downloaded to local disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhotoMessageEvent {
    pub chat_id: String,
    pub sender: Sender,
    pub image_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackEvent {
    pub chat_id: String,
    pub sender: Sender,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(ReplyMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("problem handler failure: {0}")]
    Problem(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
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
        envelope: &ChatEnvelope,
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

/// Registers every chat handler against one problem service and one command service.
pub fn tutor_dispatcher<P, C>(problems: Arc<P>, commands: C) -> EventDispatcher
where
    P: ProblemService + 'static,
    C: CommandService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(commands));
    dispatcher.register(TextMessageHandler::new(problems.clone()));
    dispatcher.register(PhotoMessageHandler::new(problems.clone()));
    dispatcher.register(CallbackHandler::new(problems));
    dispatcher
}

pub fn default_dispatcher() -> EventDispatcher {
    tutor_dispatcher(Arc::new(NoopProblemService), NoopCommandService)
}

pub struct CommandHandler<S> {
    router: CommandRouter<S>,
}

impl<S> CommandHandler<S>
where
    S: CommandService,
{
    pub fn new(service: S) -> Self {
        Self { router: CommandRouter::new(service) }
    }
}

#[async_trait]
impl<S> EventHandler for CommandHandler<S>
where
    S: CommandService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Command
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Command(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let normalized = normalize_command(payload.clone())?;
        Ok(HandlerResult::Responded(self.router.route(normalized).await))
    }
}

/// Turns a math problem into a reply. Implementations map their own failures
/// to user-facing replies and reserve `Err` for faults the runner should log.
#[async_trait]
pub trait ProblemService: Send + Sync {
    async fn solve_text(
        &self,
        sender: &Sender,
        problem: &str,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError>;

    async fn solve_photo(
        &self,
        sender: &Sender,
        image_path: &Path,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError>;
}

pub struct NoopProblemService;

#[async_trait]
impl ProblemService for NoopProblemService {
    async fn solve_text(
        &self,
        _sender: &Sender,
        _problem: &str,
        _ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        Ok(ReplyMessage::plain("🤔 The solver is not configured yet. Please try again later."))
    }

    async fn solve_photo(
        &self,
        _sender: &Sender,
        _image_path: &Path,
        _ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        Ok(ReplyMessage::plain("🤔 The solver is not configured yet. Please try again later."))
    }
}

pub struct TextMessageHandler<S> {
    service: Arc<S>,
}

impl<S> TextMessageHandler<S>
where
    S: ProblemService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for TextMessageHandler<S>
where
    S: ProblemService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::TextMessage
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::TextMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.text.trim().is_empty() {
            return Ok(HandlerResult::Ignored);
        }

        let reply = self.service.solve_text(&event.sender, &event.text, ctx).await?;
        Ok(HandlerResult::Responded(reply))
    }
}

pub struct PhotoMessageHandler<S> {
    service: Arc<S>,
}

impl<S> PhotoMessageHandler<S>
where
    S: ProblemService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for PhotoMessageHandler<S>
where
    S: ProblemService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::PhotoMessage
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::PhotoMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let reply = self.service.solve_photo(&event.sender, &event.image_path, ctx).await?;
        Ok(HandlerResult::Responded(reply))
    }
}

/// Inline-button presses. Demo buttons solve their canned question through the
/// same path as typed problems, so they count against the caller's allowance.
pub struct CallbackHandler<S> {
    service: Arc<S>,
}

impl<S> CallbackHandler<S>
where
    S: ProblemService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for CallbackHandler<S>
where
    S: ProblemService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Callback
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Callback(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if event.data == messages::ASK_OWN_CALLBACK {
            return Ok(HandlerResult::Responded(messages::ask_own_hint()));
        }
        let Some(demo) = messages::demo_question(&event.data) else {
            return Ok(HandlerResult::Ignored);
        };

        let solved = self.service.solve_text(&event.sender, demo.question, ctx).await?;
        let follow_up = messages::ask_own_prompt();
        let mut reply = solved;
        reply.text = format!(
            "📝 Demo Question: {}\n\n{}\n\n{}",
            demo.question, reply.text, follow_up.text
        );
        reply.buttons.extend(follow_up.buttons);
        Ok(HandlerResult::Responded(reply))
    }
}
