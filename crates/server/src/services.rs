//! Chat-facing services backed by the tutor runtime.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tutorbot_agent::runtime::{TutorReply, TutorRuntime};
use tutorbot_chat::{
    commands::{ChatCommand, CommandEnvelope, CommandService},
    events::{EventContext, EventHandlerError, ProblemService, Sender},
    messages::{self, ReplyMessage},
};
use tutorbot_core::{CallerId, CallerStatus, SolveError};

pub struct TutorProblemService {
    runtime: Arc<TutorRuntime>,
}

impl TutorProblemService {
    pub fn new(runtime: Arc<TutorRuntime>) -> Self {
        Self { runtime }
    }
}

fn to_reply(outcome: Result<TutorReply, SolveError>) -> ReplyMessage {
    match outcome {
        Ok(reply) => ReplyMessage::markdown(reply.rendered),
        Err(error) => messages::error_message(&error),
    }
}

#[async_trait]
impl ProblemService for TutorProblemService {
    async fn solve_text(
        &self,
        sender: &Sender,
        problem: &str,
        _ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        Ok(to_reply(self.runtime.handle_text_problem(&sender.caller_id, problem).await))
    }

    async fn solve_photo(
        &self,
        sender: &Sender,
        image_path: &Path,
        _ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        Ok(to_reply(self.runtime.handle_image_problem(&sender.caller_id, image_path).await))
    }
}

pub struct TutorCommandService {
    runtime: Arc<TutorRuntime>,
}

impl TutorCommandService {
    pub fn new(runtime: Arc<TutorRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl CommandService for TutorCommandService {
    async fn caller_status(&self, caller: &CallerId) -> Option<CallerStatus> {
        Some(self.runtime.governor().status(caller))
    }

    fn provider_label(&self) -> String {
        self.runtime.provider().to_owned()
    }

    async fn command_answered(
        &self,
        envelope: &CommandEnvelope,
        command: &ChatCommand,
        reply: &ReplyMessage,
    ) {
        self.runtime
            .record_command(&envelope.sender.caller_id, &format!("/{}", command.as_str()), &reply.text)
            .await;
    }
}
