use std::fs;
use std::path::Path;

use chrono::Utc;
use tutorbot_core::normalizer::{run_cascade, NormalizeInput, Normalization, CASCADE};

use super::CommandResult;

/// Runs a saved provider response through the strategy cascade.
pub fn run(path: &Path, problem: &str, provider: &str) -> CommandResult {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "normalize",
                "io",
                format!("could not read `{}`: {error}", path.display()),
                2,
            )
        }
    };

    let input = NormalizeInput { raw: &raw, original_problem: problem, provider, created_at: Utc::now() };
    match run_cascade(&CASCADE, &input) {
        Normalization::Solved { strategy, solution } => match serde_json::to_value(&solution) {
            Ok(data) => CommandResult::success_with_data(
                "normalize",
                format!("normalized by strategy `{strategy}`"),
                Some(data),
            ),
            Err(error) => CommandResult::failure("normalize", "serialization", error.to_string(), 5),
        },
        Normalization::Declined { reason } => {
            CommandResult::failure("normalize", "provider_declined", reason, 3)
        }
        Normalization::Failed { reason } => {
            CommandResult::failure("normalize", "malformed_response", reason, 4)
        }
    }
}
