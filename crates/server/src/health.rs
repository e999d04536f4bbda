use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tutorbot_agent::conversation::{
    retention_cutoff, ConversationAnalytics, ConversationEntry, ConversationLog,
    NoopConversationLog,
};
use tutorbot_core::{CallerId, CallerStatus, GovernorStatistics, UsageGovernor};

const DEFAULT_ANALYTICS_DAYS: u64 = 30;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Clone)]
pub struct HealthState {
    governor: Arc<UsageGovernor>,
    conversation_log: Arc<dyn ConversationLog>,
    provider: String,
    transport: &'static str,
}

impl HealthState {
    pub fn new(governor: Arc<UsageGovernor>, provider: impl Into<String>, transport: &'static str) -> Self {
        Self {
            governor,
            conversation_log: Arc::new(NoopConversationLog),
            provider: provider.into(),
            transport,
        }
    }

    pub fn with_conversation_log(mut self, conversation_log: Arc<dyn ConversationLog>) -> Self {
        self.conversation_log = conversation_log;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub governor: GovernorStatistics,
    pub provider: String,
    pub transport: &'static str,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResetResponse {
    pub caller_id: String,
    pub reset: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct AnalyticsParams {
    /// Look-back in days; zero covers the whole log.
    pub days: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/governor/stats", get(governor_stats))
        .route("/governor/callers/{caller_id}", get(caller_status))
        .route("/governor/callers/{caller_id}/reset", post(reset_caller))
        .route("/conversations/analytics", get(conversation_analytics))
        .route("/conversations/callers/{caller_id}", get(conversation_history))
        .with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "tutorbot-server runtime initialized".to_string(),
        },
        governor: state.governor.statistics(),
        provider: state.provider.clone(),
        transport: state.transport,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}

pub async fn governor_stats(State(state): State<HealthState>) -> Json<GovernorStatistics> {
    Json(state.governor.statistics())
}

pub async fn caller_status(
    State(state): State<HealthState>,
    Path(caller_id): Path<String>,
) -> Json<CallerStatus> {
    Json(state.governor.status(&CallerId::from(caller_id)))
}

pub async fn reset_caller(
    State(state): State<HealthState>,
    Path(caller_id): Path<String>,
) -> Json<ResetResponse> {
    let caller = CallerId::from(caller_id);
    state.governor.reset(&caller);
    info!(
        event_name = "system.governor.caller_reset",
        correlation_id = "admin",
        caller_id = %caller,
        "caller usage reset over http"
    );
    Json(ResetResponse { caller_id: caller.to_string(), reset: true })
}

pub async fn conversation_analytics(
    State(state): State<HealthState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<ConversationAnalytics>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_ANALYTICS_DAYS);
    let since = retention_cutoff(Utc::now(), days).unwrap_or(DateTime::<Utc>::MIN_UTC);

    state.conversation_log.analytics(since).await.map(Json).map_err(|error| {
        conversation_log_error("analytics", &error)
    })
}

pub async fn conversation_history(
    State(state): State<HealthState>,
    Path(caller_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ConversationEntry>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);

    state.conversation_log.history(&caller_id, limit).await.map(Json).map_err(|error| {
        conversation_log_error("history", &error)
    })
}

fn conversation_log_error(operation: &'static str, error: &anyhow::Error) -> ApiError {
    error!(
        event_name = "system.conversations.read_failed",
        correlation_id = "admin",
        operation,
        error = %format!("{error:#}"),
        "conversation log could not be read"
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: "conversation log unavailable".to_string() }),
    )
}
