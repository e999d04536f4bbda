//! JSON strategies: the reply the prompt asks for, and a repair pass for the
//! ways models usually break it.

use serde_json::{Map, Value};

use crate::domain::solution::{Difficulty, ProblemType, SolutionDraft};
use crate::normalizer::cleanup::{clean_json_steps, strip_markup};
use crate::normalizer::heuristic::sentence_steps;
use crate::normalizer::{Attempt, NormalizeError, NormalizeInput};

/// Slice from the first `{` to the last `}`; providers often wrap the object
/// in prose.
pub fn brace_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn strict_json(input: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
    let Some(slice) = brace_slice(input.raw) else {
        return Ok(Attempt::Pass { reason: "no_json_object" });
    };
    let Ok(value) = serde_json::from_str::<Value>(slice) else {
        return Ok(Attempt::Pass { reason: "json_parse_failed" });
    };

    evaluate(value, input)
}

pub fn salvaged_json(input: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
    match brace_slice(input.raw) {
        None => return Ok(Attempt::Pass { reason: "no_json_object" }),
        Some(slice) if serde_json::from_str::<Value>(slice).is_ok() => {
            return Ok(Attempt::Pass { reason: "strict_json_already_parsed" });
        }
        Some(_) => {}
    }

    let repaired = repair(input.raw);
    let candidates = brace_slice(&repaired).into_iter().chain(balanced_objects(&repaired));

    for candidate in candidates {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        match evaluate(value, input)? {
            Attempt::Pass { .. } => continue,
            decided => return Ok(decided),
        }
    }

    Ok(Attempt::Pass { reason: "json_unrecoverable" })
}

fn evaluate(value: Value, input: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
    let Value::Object(object) = value else {
        return Ok(Attempt::Pass { reason: "json_not_an_object" });
    };

    if let Some(error) = object.get("error") {
        let reason = scalar_text(error).unwrap_or_else(|| error.to_string());
        return Ok(Attempt::Declined { reason });
    }

    if !object.contains_key("solution") && !object.contains_key("steps") {
        return Ok(Attempt::Pass { reason: "missing_required_keys" });
    }

    let solution_text = object
        .get("solution")
        .and_then(scalar_text)
        .map(|text| strip_markup(&text).trim().to_owned())
        .unwrap_or_default();
    if solution_text.is_empty() {
        return Ok(Attempt::Pass { reason: "empty_solution" });
    }

    let explanation = object
        .get("explanation")
        .and_then(scalar_text)
        .filter(|text| !text.is_empty());

    let mut steps = clean_json_steps(raw_steps(&object));
    if steps.is_empty() {
        if let Some(explanation) = &explanation {
            steps = sentence_steps(explanation);
        }
    }

    let draft = SolutionDraft {
        problem_type: ProblemType::from_label(object.get("problem_type").and_then(Value::as_str)),
        difficulty: Difficulty::from_label(object.get("difficulty").and_then(Value::as_str)),
        solution_text,
        steps,
        explanation,
        key_concepts: key_concepts(&object),
    };

    Ok(Attempt::Solved(draft.finish(&input.metadata())?))
}

/// Trimmed text of a scalar; `None` for null, arrays and objects.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn raw_steps(object: &Map<String, Value>) -> Vec<String> {
    match object.get("steps") {
        Some(Value::Array(items)) => items.iter().map(stringify).collect(),
        Some(Value::String(text)) => text.lines().map(str::to_owned).collect(),
        _ => Vec::new(),
    }
}

fn key_concepts(object: &Map<String, Value>) -> Vec<String> {
    let concepts: Vec<String> = match object.get("key_concepts") {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(text)) => text.split(',').map(|item| item.trim().to_owned()).collect(),
        _ => Vec::new(),
    };

    concepts.into_iter().filter(|concept| !concept.is_empty()).collect()
}

/// Undo the usual damage: Markdown fences, typographic quotes and trailing
/// commas.
pub fn repair(raw: &str) -> String {
    let unfenced = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let straightened = unfenced
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    strip_trailing_commas(&straightened)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (index, &ch) in chars.iter().enumerate() {
        if in_string {
            output.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                output.push(ch);
            }
            ',' => {
                let next = chars[index + 1..].iter().find(|next| !next.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    output.push(ch);
                }
            }
            _ => output.push(ch),
        }
    }

    output
}

/// Top-level balanced `{...}` spans in order of appearance, ignoring braces
/// inside string literals.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = index;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    objects.push(&text[start..=index]);
                }
            }
            _ => {}
        }
    }

    objects
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{balanced_objects, brace_slice, repair, salvaged_json, strict_json};
    use crate::domain::solution::{Difficulty, ProblemType};
    use crate::normalizer::{Attempt, NormalizeInput};

    fn input(raw: &str) -> NormalizeInput<'_> {
        NormalizeInput { raw, original_problem: "2x + 5 = 15", provider: "openai", created_at: Utc::now() }
    }

    fn solved(attempt: Attempt) -> crate::domain::solution::Solution {
        match attempt {
            Attempt::Solved(solution) => solution,
            other => panic!("expected a solution, got {other:?}"),
        }
    }

    #[test]
    fn full_schema_reply_populates_every_field() {
        let raw = r#"Here is the solution:
{
    "problem_type": "algebra",
    "difficulty": "middle_school",
    "solution": "  x = 5  ",
    "steps": [
        "Step 1: Subtract 5 from both sides: 2x + 5 - 5 = 15 - 5",
        "Step 2: Simplify: 2x = 10",
        "Step 3: Divide both sides by 2: x = 5"
    ],
    "explanation": "This is a linear equation.",
    "key_concepts": ["Linear Equations", "Inverse Operations", ""]
}
Hope this helps!"#;

        let solution = solved(strict_json(&input(raw)).expect("no fault"));

        assert_eq!(solution.solution_text(), "x = 5");
        assert_eq!(solution.problem_type(), ProblemType::Algebra);
        assert_eq!(solution.difficulty(), Difficulty::MiddleSchool);
        assert_eq!(solution.steps().len(), 3);
        assert_eq!(solution.steps()[1], "Step 2: Simplify: 2x = 10");
        assert_eq!(solution.explanation(), Some("This is a linear equation."));
        assert_eq!(solution.key_concepts(), ["Linear Equations", "Inverse Operations"]);
    }

    #[test]
    fn surviving_steps_keep_relative_order() {
        let raw = r#"{"solution": "12", "steps": ["Step A: multiply three by four", "ok", "\"leak\",", 7, "Step B: write the product down"]}"#;

        let solution = solved(strict_json(&input(raw)).expect("no fault"));

        assert_eq!(solution.steps(), ["Step A: multiply three by four", "Step B: write the product down"]);
    }

    #[test]
    fn numeric_solution_is_stringified() {
        let raw = r#"{"solution": 42, "steps": []}"#;
        let solution = solved(strict_json(&input(raw)).expect("no fault"));
        assert_eq!(solution.solution_text(), "42");
        assert!(solution.steps().is_empty());
    }

    #[test]
    fn missing_steps_fall_back_to_explanation_sentences() {
        let raw = r#"{"solution": "x = 5", "explanation": "Subtract five from both sides. Then divide everything by two."}"#;

        let solution = solved(strict_json(&input(raw)).expect("no fault"));

        assert_eq!(
            solution.steps(),
            ["Subtract five from both sides.", "Then divide everything by two."]
        );
    }

    #[test]
    fn incomplete_object_passes_instead_of_failing() {
        let attempt = strict_json(&input(r#"{"problem_type": "algebra"}"#)).expect("no fault");
        assert_eq!(attempt, Attempt::Pass { reason: "missing_required_keys" });
    }

    #[test]
    fn blank_solution_passes_to_later_strategies() {
        let attempt = strict_json(&input(r#"{"solution": "  ", "steps": ["Step 1: do things"]}"#))
            .expect("no fault");
        assert_eq!(attempt, Attempt::Pass { reason: "empty_solution" });
    }

    #[test]
    fn error_field_declines_with_reason() {
        let attempt = strict_json(&input(r#"{"error": "not a math problem"}"#)).expect("no fault");
        assert_eq!(attempt, Attempt::Declined { reason: "not a math problem".to_owned() });
    }

    #[test]
    fn unparsable_slice_passes() {
        let attempt = strict_json(&input(r#"{"solution": "x = 5", "steps": [}"#)).expect("no fault");
        assert_eq!(attempt, Attempt::Pass { reason: "json_parse_failed" });
    }

    #[test]
    fn salvage_repairs_fences_and_trailing_commas() {
        let raw = "```json\n{\n  \"solution\": \"x = 5\",\n  \"steps\": [\n    \"Step 1: Subtract 5 from both sides\",\n  ],\n}\n```";

        assert!(matches!(strict_json(&input(raw)), Ok(Attempt::Pass { .. })));
        let solution = solved(salvaged_json(&input(raw)).expect("no fault"));

        assert_eq!(solution.solution_text(), "x = 5");
        assert_eq!(solution.steps(), ["Step 1: Subtract 5 from both sides"]);
    }

    #[test]
    fn salvage_finds_object_among_stray_braces() {
        let raw = r#"Let {x} be unknown. {"solution": "x = 3", "steps": ["Step 1: isolate the x term"]} and {y}"#;

        let solution = solved(salvaged_json(&input(raw)).expect("no fault"));
        assert_eq!(solution.solution_text(), "x = 3");
    }

    #[test]
    fn salvage_still_honours_error_field() {
        let raw = "```json\n{\"error\": \"Unable to solve: unclear\",}\n```";
        let attempt = salvaged_json(&input(raw)).expect("no fault");
        assert_eq!(attempt, Attempt::Declined { reason: "Unable to solve: unclear".to_owned() });
    }

    #[test]
    fn salvage_skips_when_strict_parse_succeeded() {
        let attempt = salvaged_json(&input(r#"{"problem_type": "algebra"}"#)).expect("no fault");
        assert_eq!(attempt, Attempt::Pass { reason: "strict_json_already_parsed" });
    }

    #[test]
    fn brace_slice_requires_ordered_braces() {
        assert_eq!(brace_slice("} then {"), None);
        assert_eq!(brace_slice("a {b} c"), Some("{b}"));
    }

    #[test]
    fn trailing_commas_inside_strings_survive_repair() {
        assert_eq!(repair(r#"{"a": "x, }", "b": [1, 2,],}"#), r#"{"a": "x, }", "b": [1, 2]}"#);
    }

    #[test]
    fn balanced_scan_ignores_braces_in_strings() {
        let objects = balanced_objects(r#"pre {"a": "}{"} mid {"b": {"c": 1}} post"#);
        assert_eq!(objects, [r#"{"a": "}{"}"#, r#"{"b": {"c": 1}}"#]);
    }
}
