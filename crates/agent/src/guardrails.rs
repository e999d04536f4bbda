use tracing::{info, warn};
use tutorbot_core::config::GuardrailsConfig;

const MATH_TERMS: &[&str] = &[
    "algebra", "calculus", "geometry", "trigonometry", "statistics", "derivative", "integral",
    "equation", "function", "variable", "coefficient", "polynomial", "logarithm", "exponential",
    "matrix", "vector", "angle", "triangle", "circle", "square", "rectangle", "probability",
    "mean", "median", "mode", "standard deviation", "solve", "calculate", "find", "determine",
    "evaluate", "simplify", "factor", "expand", "graph", "plot", "limit", "series", "sequence",
    "what is", "how much", "how many", "derive", "prove", "show that", "integrate",
    "differentiate",
];

const EDUCATIONAL_TERMS: &[&str] = &[
    "help", "learn", "understand", "explain", "how", "why", "what", "homework", "assignment",
    "problem", "question", "exercise", "study", "practice", "review", "test", "exam", "quiz",
];

const MATH_SYMBOLS: &[char] =
    &['∫', '∑', '∏', '√', 'π', 'θ', 'α', 'β', 'γ', 'δ', 'λ', 'μ', 'σ', '∞', '²', '³'];
const OPERATORS: &[char] = &['+', '-', '*', '/', '=', '^'];
const QUESTION_VERBS: &[&str] = &["solve", "find", "calculate"];

pub const TIP_MATH_TERMS: &str =
    "Try including specific mathematical terms or expressions in your question.";
pub const TIP_MORE_DETAIL: &str =
    "Provide more details about your math problem for better assistance.";
pub const TIP_CLEAR_QUESTION: &str =
    "Frame your message as a clear question (e.g., 'Solve for x: ...' or 'What is...').";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str },
    /// Allowed, but the content does not look like mathematics.
    Degrade { reason_code: &'static str },
}

impl GuardrailDecision {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }
}

/// Screens inbound problem text before it reaches a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentGuardrail {
    enabled: bool,
    blocked_keywords: Vec<String>,
    max_input_chars: usize,
}

impl Default for ContentGuardrail {
    fn default() -> Self {
        Self::from_config(&tutorbot_core::AppConfig::default().guardrails)
    }
}

impl ContentGuardrail {
    pub fn from_config(config: &GuardrailsConfig) -> Self {
        Self {
            enabled: config.enabled,
            blocked_keywords: config.blocked_keywords.iter().map(|kw| kw.to_lowercase()).collect(),
            max_input_chars: config.max_input_chars,
        }
    }

    pub fn evaluate(&self, text: &str) -> GuardrailDecision {
        if !self.enabled {
            return GuardrailDecision::Allow;
        }

        let lowered = text.trim().to_lowercase();
        if lowered.chars().count() < 3 {
            return GuardrailDecision::Allow;
        }

        if self.blocked_keywords.iter().any(|keyword| lowered.contains(keyword.as_str())) {
            warn!(
                event_name = "agent.guardrail.denied",
                reason_code = "blocked_keyword",
                preview = %preview(text),
                "blocked content detected"
            );
            return GuardrailDecision::Deny { reason_code: "blocked_keyword" };
        }

        if is_math_related(&lowered) || has_educational_intent(&lowered) {
            return GuardrailDecision::Allow;
        }

        info!(
            event_name = "agent.guardrail.degraded",
            reason_code = "non_math_content",
            preview = %preview(text),
            "potentially non-math content allowed"
        );
        GuardrailDecision::Degrade { reason_code: "non_math_content" }
    }

    /// Phrasing hints for a message that did not read as a math question.
    pub fn suggestions(&self, text: &str) -> Vec<&'static str> {
        let lowered = text.to_lowercase();
        let mut tips = Vec::new();

        if !is_math_related(&lowered) {
            tips.push(TIP_MATH_TERMS);
        }
        if text.chars().count() < 10 {
            tips.push(TIP_MORE_DETAIL);
        }
        if !text.contains('?') && !QUESTION_VERBS.iter().any(|verb| lowered.contains(verb)) {
            tips.push(TIP_CLEAR_QUESTION);
        }
        tips
    }

    /// Collapses whitespace, drops control characters and caps the length.
    pub fn sanitize(&self, text: &str) -> String {
        let collapsed = text
            .split_whitespace()
            .map(|word| word.chars().filter(|ch| !ch.is_control()).collect::<String>())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if collapsed.chars().count() <= self.max_input_chars {
            return collapsed;
        }

        warn!(
            event_name = "agent.guardrail.truncated",
            max_input_chars = self.max_input_chars,
            "input truncated due to length"
        );
        let mut truncated: String = collapsed.chars().take(self.max_input_chars).collect();
        truncated.push_str("...");
        truncated
    }
}

fn is_math_related(lowered: &str) -> bool {
    MATH_TERMS.iter().any(|term| lowered.contains(term))
        || lowered.chars().any(|ch| ch.is_ascii_digit() || MATH_SYMBOLS.contains(&ch))
        || has_algebraic_expression(lowered)
        || has_latex(lowered)
}

fn has_algebraic_expression(lowered: &str) -> bool {
    let compact: Vec<char> = lowered.chars().filter(|ch| !ch.is_whitespace()).collect();
    compact.windows(3).any(|window| {
        window[0].is_ascii_alphabetic()
            && OPERATORS.contains(&window[1])
            && window[2].is_ascii_alphanumeric()
    })
}

fn has_latex(lowered: &str) -> bool {
    let inline_math = lowered.matches('$').count() >= 2;
    let command = lowered.split('\\').skip(1).any(|rest| {
        let name_len = rest.chars().take_while(|ch| ch.is_ascii_alphabetic()).count();
        name_len > 0 && rest[name_len..].starts_with('{')
    });
    inline_math || command
}

fn has_educational_intent(lowered: &str) -> bool {
    EDUCATIONAL_TERMS.iter().any(|term| lowered.contains(term))
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
