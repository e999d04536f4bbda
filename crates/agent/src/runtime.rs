use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use tutorbot_core::errors::{IoSource, SolveError};
use tutorbot_core::normalizer::{run_cascade, NormalizeInput, Normalization, CASCADE};
use tutorbot_core::prompt::solution_prompt;
use tutorbot_core::{normalize_ocr_text, Admission, CallerId, Solution, UsageGovernor};

use crate::conversation::{ConversationEntry, ConversationLog, EntryKind, NoopConversationLog};
use crate::guardrails::{ContentGuardrail, GuardrailDecision};
use crate::llm::LlmClient;
use crate::ocr::{DisabledOcr, OcrClient};
use crate::render::{format_image_solution, format_solution, with_tips};

pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TutorReply {
    pub solution: Solution,
    /// Which normalization strategy produced the solution.
    pub strategy: &'static str,
    pub extracted_text: Option<String>,
    pub rendered: String,
}

/// Screened problem text plus phrasing tips for non-math content.
struct Screened {
    problem: String,
    tips: Vec<&'static str>,
}

/// Orchestrates one solve request: quota, screening, OCR, provider call,
/// normalization, rendering and logging.
pub struct TutorRuntime {
    governor: Arc<UsageGovernor>,
    guardrail: ContentGuardrail,
    llm: Arc<dyn LlmClient>,
    ocr: Arc<dyn OcrClient>,
    conversation_log: Arc<dyn ConversationLog>,
    llm_timeout: Duration,
}

impl TutorRuntime {
    pub fn new(governor: Arc<UsageGovernor>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            governor,
            guardrail: ContentGuardrail::default(),
            llm,
            ocr: Arc::new(DisabledOcr),
            conversation_log: Arc::new(NoopConversationLog),
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_guardrail(mut self, guardrail: ContentGuardrail) -> Self {
        self.guardrail = guardrail;
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrClient>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_conversation_log(mut self, conversation_log: Arc<dyn ConversationLog>) -> Self {
        self.conversation_log = conversation_log;
        self
    }

    pub fn with_llm_timeout(mut self, llm_timeout: Duration) -> Self {
        self.llm_timeout = llm_timeout;
        self
    }

    pub fn governor(&self) -> &Arc<UsageGovernor> {
        &self.governor
    }

    pub fn provider(&self) -> &str {
        self.llm.provider()
    }

    pub async fn handle_text_problem(
        &self,
        caller: &CallerId,
        text: &str,
    ) -> Result<TutorReply, SolveError> {
        let started = Instant::now();
        let outcome = self.text_problem(caller, text).await;
        self.record(caller, EntryKind::TextProblem, text.to_string(), &outcome, started).await;
        outcome
    }

    pub async fn handle_image_problem(
        &self,
        caller: &CallerId,
        image_path: &Path,
    ) -> Result<TutorReply, SolveError> {
        let started = Instant::now();
        let outcome = self.image_problem(caller, image_path).await;
        let content = match &outcome {
            Ok(TutorReply { extracted_text: Some(text), .. }) => format!("Image OCR: {text}"),
            _ => format!("Image: {}", image_path.display()),
        };
        self.record(caller, EntryKind::ImageProblem, content, &outcome, started).await;
        outcome
    }

    /// Records a command exchange; failures are logged, never returned.
    pub async fn record_command(&self, caller: &CallerId, command: &str, reply: &str) {
        let entry = ConversationEntry {
            timestamp: Utc::now(),
            caller_id: caller.to_string(),
            kind: EntryKind::Command,
            content: command.to_string(),
            response: Some(serde_json::Value::String(reply.to_string())),
            processing_time_ms: 0,
            error: None,
        };
        self.write_entry(entry).await;
    }

    /// Prompt, provider call and normalization, without quota or screening.
    pub async fn solve(&self, problem: &str) -> Result<(Solution, &'static str), SolveError> {
        let prompt = solution_prompt(problem);
        let raw = match tokio::time::timeout(self.llm_timeout, self.llm.complete(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(error)) => {
                return Err(SolveError::TransientIo {
                    source_kind: IoSource::Provider,
                    message: format!("{error:#}"),
                })
            }
            Err(_) => {
                return Err(SolveError::TransientIo {
                    source_kind: IoSource::ProviderTimeout,
                    message: format!("no reply within {}s", self.llm_timeout.as_secs()),
                })
            }
        };

        let input = NormalizeInput {
            raw: &raw,
            original_problem: problem,
            provider: self.llm.provider(),
            created_at: Utc::now(),
        };
        match run_cascade(&CASCADE, &input) {
            Normalization::Solved { strategy, solution } => Ok((solution, strategy)),
            Normalization::Declined { reason } => Err(SolveError::ProviderDeclined { reason }),
            Normalization::Failed { reason } => Err(SolveError::MalformedResponse(reason)),
        }
    }

    async fn text_problem(&self, caller: &CallerId, text: &str) -> Result<TutorReply, SolveError> {
        self.admit(caller)?;
        let Screened { problem, tips } = self.screen(caller, text)?;

        let (solution, strategy) = self.solve(&problem).await?;
        let rendered = with_tips(format_solution(&solution), &tips);
        Ok(TutorReply { solution, strategy, extracted_text: None, rendered })
    }

    async fn image_problem(
        &self,
        caller: &CallerId,
        image_path: &Path,
    ) -> Result<TutorReply, SolveError> {
        self.admit(caller)?;

        let extracted = self.ocr.extract_text(image_path).await.map_err(|error| {
            SolveError::TransientIo { source_kind: IoSource::Ocr, message: format!("{error:#}") }
        })?;
        let text = extracted
            .map(|raw| normalize_ocr_text(&raw))
            .filter(|text| !text.is_empty())
            .ok_or(SolveError::NoTextExtracted)?;

        let Screened { problem, tips } = self.screen(caller, &text)?;
        let (solution, strategy) = self.solve(&problem).await?;
        let rendered = with_tips(format_image_solution(&problem, &solution), &tips);
        Ok(TutorReply { solution, strategy, extracted_text: Some(problem), rendered })
    }

    fn admit(&self, caller: &CallerId) -> Result<(), SolveError> {
        match self.governor.evaluate(caller) {
            Admission::Allowed { .. } => Ok(()),
            denied => Err(SolveError::RateLimited {
                retry_after_secs: denied.retry_after_secs(self.governor.now()),
            }),
        }
    }

    fn screen(&self, caller: &CallerId, text: &str) -> Result<Screened, SolveError> {
        let sanitized = self.guardrail.sanitize(text);
        match self.guardrail.evaluate(&sanitized) {
            GuardrailDecision::Deny { reason_code } => {
                Err(SolveError::ContentRejected { reason_code })
            }
            GuardrailDecision::Degrade { reason_code } => {
                info!(
                    event_name = "agent.runtime.degraded_content",
                    caller_id = %caller,
                    reason_code,
                    "continuing with non-math content"
                );
                let tips = self.guardrail.suggestions(&sanitized);
                Ok(Screened { problem: sanitized, tips })
            }
            GuardrailDecision::Allow => Ok(Screened { problem: sanitized, tips: Vec::new() }),
        }
    }

    async fn record(
        &self,
        caller: &CallerId,
        kind: EntryKind,
        content: String,
        outcome: &Result<TutorReply, SolveError>,
        started: Instant,
    ) {
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (response, error) = match outcome {
            Ok(reply) => {
                info!(
                    event_name = "agent.runtime.solved",
                    caller_id = %caller,
                    strategy = reply.strategy,
                    provider = reply.solution.provider(),
                    processing_time_ms,
                    "problem solved"
                );
                (serde_json::to_value(&reply.solution).ok(), None)
            }
            Err(failure) => {
                log_failure(caller, failure);
                (None, Some(failure.to_string()))
            }
        };

        let entry = ConversationEntry {
            timestamp: Utc::now(),
            caller_id: caller.to_string(),
            kind,
            content,
            response,
            processing_time_ms,
            error,
        };
        self.write_entry(entry).await;
    }

    async fn write_entry(&self, entry: ConversationEntry) {
        if let Err(error) = self.conversation_log.record(entry).await {
            warn!(
                event_name = "agent.conversation_log.failed",
                error = %format!("{error:#}"),
                "failed to record conversation entry"
            );
        }
    }
}

fn log_failure(caller: &CallerId, failure: &SolveError) {
    if failure.is_application_error() {
        error!(
            event_name = "agent.runtime.failed",
            caller_id = %caller,
            error_class = failure.error_class(),
            error = %failure,
            "solve request failed"
        );
    } else if matches!(failure, SolveError::RateLimited { .. }) {
        info!(
            event_name = "agent.runtime.rate_limited",
            caller_id = %caller,
            error = %failure,
            "solve request throttled"
        );
    } else {
        warn!(
            event_name = "agent.runtime.rejected",
            caller_id = %caller,
            error_class = failure.error_class(),
            error = %failure,
            "solve request not answered"
        );
    }
}
