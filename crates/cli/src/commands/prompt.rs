use tutorbot_core::prompt::{solution_prompt, SYSTEM_PROMPT};

use super::CommandResult;

pub fn run(problem: &str) -> CommandResult {
    if problem.trim().is_empty() {
        return CommandResult::failure("prompt", "invalid_input", "problem text is empty", 2);
    }
    CommandResult::success_with_data(
        "prompt",
        solution_prompt(problem),
        Some(serde_json::json!({ "system": SYSTEM_PROMPT })),
    )
}
