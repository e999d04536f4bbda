use std::{sync::Arc, time::Duration};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use tutorbot_agent::{
    conversation::{retention_cutoff, ConversationLog, JsonlConversationLog, NoopConversationLog},
    guardrails::ContentGuardrail,
    llm::client_from_config,
    ocr::{DisabledOcr, OcrClient, TesseractOcr},
    runtime::TutorRuntime,
};
use tutorbot_chat::{
    events::tutor_dispatcher,
    transport::{ChatRunner, ChatTransport, ConsoleTransport, NoopChatTransport, ReconnectPolicy},
};
use tutorbot_core::{
    config::{AppConfig, ChatTransportKind, ConfigError},
    CallerId, GovernorSweeper, SweeperHandle, UsageGovernor,
};

use crate::services::{TutorCommandService, TutorProblemService};

/// Caller identity used for every line typed into the console transport.
pub const CONSOLE_CALLER: &str = "console";

pub struct Application {
    pub config: AppConfig,
    pub governor: Arc<UsageGovernor>,
    pub runtime: Arc<TutorRuntime>,
    pub conversation_log: Arc<dyn ConversationLog>,
    pub sweeper: SweeperHandle,
    pub chat_runner: ChatRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("llm client setup failed: {0}")]
    LlmClient(String),
}

/// Wires an already loaded config. The config is validated again so callers
/// that build `AppConfig` by hand get the same guarantees as `load`.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;
    let llm = client_from_config(&config.llm)
        .map_err(|error| BootstrapError::LlmClient(format!("{error:#}")))?;

    let governor = Arc::new(UsageGovernor::new(config.governor.governor_config()));
    let sweeper = GovernorSweeper::start(
        governor.clone(),
        Duration::from_secs(config.governor.sweep_interval_secs),
    );
    info!(
        event_name = "system.bootstrap.governor_ready",
        correlation_id = "bootstrap",
        max_requests = config.governor.max_requests,
        window_seconds = config.governor.window_seconds,
        sweep_interval_secs = config.governor.sweep_interval_secs,
        "usage governor and sweeper started"
    );

    let ocr: Arc<dyn OcrClient> = if config.ocr.enabled {
        Arc::new(TesseractOcr::from_config(&config.ocr))
    } else {
        Arc::new(DisabledOcr)
    };

    let conversation_log: Arc<dyn ConversationLog> = if config.conversation_log.enabled {
        Arc::new(JsonlConversationLog::new(&config.conversation_log.path))
    } else {
        Arc::new(NoopConversationLog)
    };
    apply_retention(conversation_log.as_ref(), config.conversation_log.retention_days).await;

    let runtime = Arc::new(
        TutorRuntime::new(governor.clone(), llm)
            .with_guardrail(ContentGuardrail::from_config(&config.guardrails))
            .with_ocr(ocr)
            .with_conversation_log(conversation_log.clone())
            .with_llm_timeout(Duration::from_secs(config.llm.timeout_secs)),
    );
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        provider = runtime.provider(),
        ocr_enabled = config.ocr.enabled,
        conversation_log_enabled = config.conversation_log.enabled,
        "tutor runtime initialized"
    );

    let transport: Arc<dyn ChatTransport> = match config.chat.transport {
        ChatTransportKind::Console => Arc::new(ConsoleTransport::stdio(CallerId::from(CONSOLE_CALLER))),
        ChatTransportKind::Noop => Arc::new(NoopChatTransport),
    };
    let dispatcher = tutor_dispatcher(
        Arc::new(TutorProblemService::new(runtime.clone())),
        TutorCommandService::new(runtime.clone()),
    );
    let chat_runner = ChatRunner::new(
        transport,
        dispatcher,
        ReconnectPolicy::with_max_retries(config.chat.reconnect_max_retries),
    );

    Ok(Application { config, governor, runtime, conversation_log, sweeper, chat_runner })
}

/// Startup retention pass; a failure only costs disk space, so it is logged.
async fn apply_retention(conversation_log: &dyn ConversationLog, retention_days: u64) {
    let Some(cutoff) = retention_cutoff(Utc::now(), retention_days) else {
        return;
    };

    match conversation_log.prune_before(cutoff).await {
        Ok(removed) => info!(
            event_name = "system.bootstrap.conversation_log_pruned",
            correlation_id = "bootstrap",
            removed,
            retention_days,
            "conversation log retention applied"
        ),
        Err(error) => warn!(
            event_name = "system.bootstrap.conversation_log_prune_failed",
            correlation_id = "bootstrap",
            error = %format!("{error:#}"),
            "conversation log retention failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tutorbot_agent::conversation::{ConversationEntry, ConversationLog, EntryKind};
    use tutorbot_core::config::{AppConfig, ChatTransportKind};
    use tutorbot_core::CallerId;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn noop_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.chat.transport = ChatTransportKind::Noop;
        config.ocr.enabled = false;
        config
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_governor_settings() {
        let mut config = noop_config();
        config.governor.max_requests = 0;

        let result = bootstrap_with_config(config).await;

        let Err(BootstrapError::Config(error)) = result else {
            panic!("expected a config error");
        };
        assert!(error.to_string().contains("governor.max_requests"));
    }

    #[tokio::test]
    async fn bootstrap_shares_one_governor_between_runtime_and_app() {
        let app = bootstrap_with_config(noop_config()).await.expect("bootstrap");

        assert!(app.governor.admit(&CallerId::from("U1")));
        assert_eq!(app.runtime.governor().statistics().total_recent_requests, 1);
        assert_eq!(app.chat_runner.transport_name(), "noop");
        assert_eq!(app.runtime.provider(), "ollama");

        app.chat_runner.start().await.expect("noop transport closes immediately");
        app.sweeper.stop().await;
    }

    #[tokio::test]
    async fn bootstrap_prunes_conversation_entries_past_retention() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conversations.jsonl");
        let lines: Vec<String> = [200, 10]
            .into_iter()
            .map(|age_days| ConversationEntry {
                timestamp: Utc::now() - Duration::days(age_days),
                caller_id: "U1".to_string(),
                kind: EntryKind::TextProblem,
                content: format!("{age_days} days old"),
                response: None,
                processing_time_ms: 5,
                error: None,
            })
            .map(|entry| serde_json::to_string(&entry).expect("entry json"))
            .collect();
        std::fs::write(&path, lines.join("\n") + "\n").expect("seed log");

        let mut config = noop_config();
        config.conversation_log.enabled = true;
        config.conversation_log.path = path;
        config.conversation_log.retention_days = 90;
        let app = bootstrap_with_config(config).await.expect("bootstrap");

        let history = app.conversation_log.history("U1", 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "10 days old");

        app.sweeper.stop().await;
    }
}
