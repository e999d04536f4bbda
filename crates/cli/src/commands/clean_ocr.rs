use tutorbot_core::text::normalize_ocr_text;

use super::CommandResult;

pub fn run(text: &str) -> CommandResult {
    let cleaned = normalize_ocr_text(text);
    if cleaned.is_empty() {
        return CommandResult::failure("clean-ocr", "no_text_extracted", "no text left after cleanup", 3);
    }
    CommandResult::success("clean-ocr", cleaned)
}
