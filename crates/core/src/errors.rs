use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("solution text is empty after cleanup")]
    EmptySolution,
    #[error("unrecognised {kind} label `{label}`")]
    UnknownLabel { kind: &'static str, label: String },
}

/// Where a transient failure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoSource {
    Provider,
    ProviderTimeout,
    Ocr,
}

impl IoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::ProviderTimeout => "provider_timeout",
            Self::Ocr => "ocr",
        }
    }
}

/// Outcome taxonomy for one solve request, as seen by the chat adapter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    #[error("provider declined the problem: {reason}")]
    ProviderDeclined { reason: String },
    #[error("provider response could not be normalized: {0}")]
    MalformedResponse(String),
    #[error("caller is rate limited for {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("content rejected by guardrail `{reason_code}`")]
    ContentRejected { reason_code: &'static str },
    #[error("no text could be extracted from the image")]
    NoTextExtracted,
    #[error("{} failure: {message}", source_kind.as_str())]
    TransientIo { source_kind: IoSource, message: String },
}

impl SolveError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ProviderDeclined { .. } | Self::MalformedResponse(_) => {
                "❌ I couldn't solve this problem. Please make sure it's a valid math question and try again."
            }
            Self::RateLimited { .. } => {
                "⏱️ You're sending messages too quickly. Please wait a moment before trying again."
            }
            Self::ContentRejected { .. } => {
                "❌ Your message contains inappropriate content. Please send math-related questions only."
            }
            Self::NoTextExtracted => {
                "❌ I couldn't extract text from your image. Please ensure the image is clear and contains readable math problems."
            }
            Self::TransientIo { .. } => {
                "❌ An error occurred while processing your request. Please try again later."
            }
        }
    }

    /// Whether the failure belongs in application error logs. Throttling and
    /// user-facing rejections are expected traffic, not faults.
    pub fn is_application_error(&self) -> bool {
        matches!(self, Self::MalformedResponse(_) | Self::TransientIo { .. })
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ProviderDeclined { .. } => "provider_declined",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ContentRejected { .. } => "content_rejected",
            Self::NoTextExtracted => "no_text_extracted",
            Self::TransientIo { .. } => "transient_io",
        }
    }
}
