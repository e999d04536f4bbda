//! Step-text cleanup shared by every strategy.

/// Steps shorter than this (in characters) carry no explanation and are
/// usually JSON debris such as `],` or `"steps": [`.
pub const MIN_STEP_CHARS: usize = 11;

pub fn strip_markup(text: &str) -> String {
    text.replace("**", "").replace("__", "")
}

/// Unwraps a step literal that leaked out of a JSON array, e.g. `"Step 1: ...",`.
pub fn unwrap_fence_leakage(text: &str) -> &str {
    let Some(inner) = text.strip_prefix('"') else {
        return text;
    };

    if let Some(inner) = inner.strip_suffix("\",") {
        return inner.trim();
    }
    if let Some(inner) = inner.strip_suffix('"') {
        return inner.trim();
    }
    text
}

pub fn tidy_step(step: &str) -> Option<String> {
    let unwrapped = unwrap_fence_leakage(step.trim());
    let cleaned = strip_markup(unwrapped);
    let cleaned = cleaned.trim();

    if cleaned.starts_with('"') || cleaned.chars().count() < MIN_STEP_CHARS {
        return None;
    }
    Some(cleaned.to_owned())
}

pub fn clean_steps<I, S>(steps: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    steps.into_iter().filter_map(|step| tidy_step(step.as_ref())).collect()
}

/// Entry filter for steps that arrived inside a parsed JSON array: entries
/// that still open with a quote are syntax leakage from a malformed reply
/// and are discarded before the shared cleanup runs.
pub fn clean_json_steps<I, S>(steps: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    steps
        .into_iter()
        .filter_map(|step| {
            let trimmed = step.as_ref().trim();
            let keep = !trimmed.is_empty()
                && trimmed.chars().count() >= MIN_STEP_CHARS
                && !trimmed.starts_with('"');
            if keep {
                tidy_step(trimmed)
            } else {
                None
            }
        })
        .collect()
}
