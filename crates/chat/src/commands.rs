use async_trait::async_trait;
use thiserror::Error;
use tutorbot_core::{CallerId, CallerStatus};

use crate::{
    events::Sender,
    messages::{self, ReplyMessage},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPayload {
    pub chat_id: String,
    pub sender: Sender,
    /// Raw message text, leading slash included.
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub name: String,
    pub args: String,
    pub chat_id: String,
    pub sender: Sender,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    About,
    Status,
    Unknown { name: String },
}

impl ChatCommand {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::About => "about",
            Self::Status => "status",
            Self::Unknown { name } => name,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("message is not a command: {0}")]
    NotACommand(String),
}

/// Splits `/name@bot args` into a lowercase name and trailing arguments.
pub fn normalize_command(payload: CommandPayload) -> Result<CommandEnvelope, CommandParseError> {
    let trimmed = payload.text.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Err(CommandParseError::NotACommand(payload.text));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
    if name.is_empty() {
        return Err(CommandParseError::NotACommand(payload.text));
    }
    let args = parts.next().unwrap_or_default().trim().to_owned();

    Ok(CommandEnvelope { name, args, chat_id: payload.chat_id, sender: payload.sender })
}

pub fn classify_command(name: &str) -> ChatCommand {
    match name {
        "start" => ChatCommand::Start,
        "help" => ChatCommand::Help,
        "about" => ChatCommand::About,
        "status" => ChatCommand::Status,
        other => ChatCommand::Unknown { name: other.to_owned() },
    }
}

#[async_trait]
pub trait CommandService: Send + Sync {
    async fn caller_status(&self, caller: &CallerId) -> Option<CallerStatus>;

    fn provider_label(&self) -> String;

    /// Called after every routed command with the reply that will be sent.
    async fn command_answered(
        &self,
        envelope: &CommandEnvelope,
        command: &ChatCommand,
        reply: &ReplyMessage,
    );
}

pub struct NoopCommandService;

#[async_trait]
impl CommandService for NoopCommandService {
    async fn caller_status(&self, _caller: &CallerId) -> Option<CallerStatus> {
        None
    }

    fn provider_label(&self) -> String {
        "an AI language model".to_owned()
    }

    async fn command_answered(
        &self,
        _envelope: &CommandEnvelope,
        _command: &ChatCommand,
        _reply: &ReplyMessage,
    ) {
    }
}

pub struct CommandRouter<S> {
    service: S,
}

impl<S> CommandRouter<S>
where
    S: CommandService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub async fn route(&self, envelope: CommandEnvelope) -> ReplyMessage {
        let command = classify_command(&envelope.name);
        let reply = match &command {
            ChatCommand::Start => messages::welcome_message(envelope.sender.display_name.as_deref()),
            ChatCommand::Help => messages::help_message(),
            ChatCommand::About => messages::about_message(&self.service.provider_label()),
            ChatCommand::Status => match self.service.caller_status(&envelope.sender.caller_id).await
            {
                Some(status) => messages::status_message(&status),
                None => messages::status_unavailable_message(),
            },
            ChatCommand::Unknown { name } => ReplyMessage::plain(format!(
                "🤷 I don't know the command /{name}. Send /help to see what I can do."
            )),
        };

        self.service.command_answered(&envelope, &command, &reply).await;
        reply
    }
}
