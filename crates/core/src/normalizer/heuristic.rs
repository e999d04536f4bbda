//! Last-resort strategy: mine prose for an answer line and step-like lines.
//! It never passes, so the cascade always ends here with a solution.

use crate::domain::solution::{Difficulty, ProblemType, SolutionDraft};
use crate::normalizer::cleanup::{clean_steps, strip_markup, tidy_step};
use crate::normalizer::{Attempt, NormalizeError, NormalizeInput};

pub const DEFAULT_SOLUTION_TEXT: &str = "See explanation below";
pub const MAX_SENTENCE_STEPS: usize = 10;

const SOLUTION_PREFIXES: [&str; 3] = ["solution:", "answer:", "result:"];
const INLINE_MARKERS: [&str; 3] = ["solution is ", "answer is ", "result is "];
const STEP_VOCABULARY: [&str; 6] = ["step", "first", "second", "then", "next", "finally"];
const DECORATION: &[char] = &['*', '#', '-', '>', '_'];

pub fn heuristic(input: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
    let mined = mine(input.raw);
    let explanation = Some(input.raw.trim()).filter(|raw| !raw.is_empty()).map(str::to_owned);

    let draft = SolutionDraft {
        problem_type: ProblemType::Unknown,
        difficulty: Difficulty::Unknown,
        solution_text: mined.solution_text,
        steps: mined.steps,
        explanation,
        key_concepts: Vec::new(),
    };

    Ok(Attempt::Solved(draft.finish(&input.metadata())?))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mined {
    pub solution_text: String,
    pub steps: Vec<String>,
}

pub fn mine(raw: &str) -> Mined {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|line| !line.is_empty()).collect();

    let prefixed = find_prefixed_answer(&lines);
    let consumed = prefixed.as_ref().map(|answer| answer.consumed.clone()).unwrap_or_default();
    let mut solution_text = prefixed.map(|answer| answer.text);

    let mut step_lines = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if consumed.contains(&index) {
            continue;
        }

        let mut remainder = None;
        if solution_text.is_none() {
            let mut sentences = split_sentences(line);
            if let Some((position, value)) = sentences
                .iter()
                .enumerate()
                .find_map(|(position, sentence)| inline_answer(sentence).map(|value| (position, value)))
            {
                solution_text = Some(value);
                sentences.remove(position);
                remainder = Some(sentences.join(" "));
            }
        }

        // Only a line that lost its answer sentence is rebuilt.
        let candidate = remainder.unwrap_or_else(|| (*line).to_owned());
        if mentions_step(&candidate) {
            step_lines.push(candidate);
        }
    }

    let mut steps = clean_steps(step_lines);
    if steps.is_empty() {
        steps = sentence_steps(raw);
    }

    Mined {
        solution_text: solution_text.unwrap_or_else(|| DEFAULT_SOLUTION_TEXT.to_owned()),
        steps,
    }
}

/// Splits on `.` and keeps segments with more than ten characters, up to
/// [`MAX_SENTENCE_STEPS`].
pub fn sentence_steps(text: &str) -> Vec<String> {
    text.split('.')
        .map(str::trim)
        .filter(|segment| segment.chars().count() > 10)
        .filter_map(|segment| tidy_step(&format!("{segment}.")))
        .take(MAX_SENTENCE_STEPS)
        .collect()
}

struct PrefixedAnswer {
    text: String,
    consumed: Vec<usize>,
}

fn find_prefixed_answer(lines: &[&str]) -> Option<PrefixedAnswer> {
    lines.iter().enumerate().find_map(|(index, line)| {
        let value = prefixed_value(line)?;
        if !value.is_empty() {
            return Some(PrefixedAnswer { text: value, consumed: vec![index] });
        }

        let next = lines.get(index + 1).map(|next| strip_markup(next).trim().to_owned());
        match next {
            Some(next) if !next.is_empty() => {
                Some(PrefixedAnswer { text: next, consumed: vec![index, index + 1] })
            }
            _ => None,
        }
    })
}

/// Text after the first colon when the line opens with a solution prefix.
fn prefixed_value(line: &str) -> Option<String> {
    let undecorated = line.trim_start_matches(|ch: char| DECORATION.contains(&ch) || ch.is_whitespace());
    let lowered = undecorated.to_ascii_lowercase();
    if !SOLUTION_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
        return None;
    }

    let (_, value) = undecorated.split_once(':')?;
    Some(strip_markup(value).trim().to_owned())
}

fn inline_answer(sentence: &str) -> Option<String> {
    let lowered = sentence.to_ascii_lowercase();

    INLINE_MARKERS.iter().find_map(|marker| {
        let position = lowered.find(marker)?;
        let at_word_start = lowered[..position]
            .chars()
            .next_back()
            .map_or(true, |previous| !previous.is_alphanumeric());
        if !at_word_start {
            return None;
        }

        let value = strip_markup(&sentence[position + marker.len()..]);
        let value = value.trim().trim_end_matches(['.', '!']).trim();
        (!value.is_empty()).then(|| value.to_owned())
    })
}

fn split_sentences(line: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let terminal = matches!(ch, '.' | '!' | '?');
        if terminal && chars.peek().map_or(true, |next| next.is_whitespace()) {
            sentences.push(std::mem::take(&mut current));
        }
    }
    sentences.push(current);

    sentences
        .into_iter()
        .map(|sentence| sentence.trim().to_owned())
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

fn mentions_step(text: &str) -> bool {
    let lowered = text.to_lowercase();
    STEP_VOCABULARY.iter().any(|word| lowered.contains(word))
}
