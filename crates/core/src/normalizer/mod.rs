//! Response normalization: raw provider text in, validated [`Solution`] out.
//!
//! Normalization is an ordered cascade of pure strategies. Each strategy
//! either solves, declines (the provider explicitly refused, which ends the
//! cascade) or passes to the next one. The last strategy never passes, so a
//! reply without a decline always produces a solution.

pub mod cleanup;
pub mod heuristic;
pub mod json;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::solution::{Solution, SolutionMetadata};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug)]
pub struct NormalizeInput<'a> {
    pub raw: &'a str,
    pub original_problem: &'a str,
    pub provider: &'a str,
    pub created_at: DateTime<Utc>,
}

impl<'a> NormalizeInput<'a> {
    pub fn metadata(&self) -> SolutionMetadata<'a> {
        SolutionMetadata {
            original_problem: self.original_problem,
            provider: self.provider,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt {
    Solved(Solution),
    Declined { reason: String },
    Pass { reason: &'static str },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type StrategyFn = fn(&NormalizeInput<'_>) -> Result<Attempt, NormalizeError>;

#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub run: StrategyFn,
}

pub const CASCADE: [Strategy; 3] = [
    Strategy { name: "strict_json", run: json::strict_json },
    Strategy { name: "salvaged_json", run: json::salvaged_json },
    Strategy { name: "heuristic", run: heuristic::heuristic },
];

/// Detailed cascade result, for callers that report *why* nothing came back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalization {
    Solved { strategy: &'static str, solution: Solution },
    Declined { reason: String },
    Failed { reason: String },
}

impl Normalization {
    pub fn into_solution(self) -> Option<Solution> {
        match self {
            Self::Solved { solution, .. } => Some(solution),
            Self::Declined { .. } | Self::Failed { .. } => None,
        }
    }
}

pub fn normalize(raw: &str, original_problem: &str, provider: &str) -> Option<Solution> {
    normalize_at(raw, original_problem, provider, Utc::now())
}

pub fn normalize_at(
    raw: &str,
    original_problem: &str,
    provider: &str,
    created_at: DateTime<Utc>,
) -> Option<Solution> {
    let input = NormalizeInput { raw, original_problem, provider, created_at };
    run_cascade(&CASCADE, &input).into_solution()
}

pub fn run_cascade(strategies: &[Strategy], input: &NormalizeInput<'_>) -> Normalization {
    for strategy in strategies {
        match (strategy.run)(input) {
            Ok(Attempt::Solved(solution)) => {
                debug!(
                    event_name = "core.normalizer.solved",
                    strategy = strategy.name,
                    provider = input.provider,
                    step_count = solution.steps().len(),
                    "provider response normalized"
                );
                return Normalization::Solved { strategy: strategy.name, solution };
            }
            Ok(Attempt::Declined { reason }) => {
                warn!(
                    event_name = "core.normalizer.declined",
                    strategy = strategy.name,
                    provider = input.provider,
                    reason = %reason,
                    "provider declined to solve the problem"
                );
                return Normalization::Declined { reason };
            }
            Ok(Attempt::Pass { reason }) => {
                debug!(
                    event_name = "core.normalizer.pass",
                    strategy = strategy.name,
                    reason,
                    "strategy passed; trying next"
                );
            }
            Err(fault) => {
                error!(
                    event_name = "core.normalizer.fault",
                    strategy = strategy.name,
                    provider = input.provider,
                    error = %fault,
                    "normalization strategy failed internally"
                );
                return Normalization::Failed { reason: fault.to_string() };
            }
        }
    }

    Normalization::Failed { reason: "no strategy produced a solution".to_owned() }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        normalize, normalize_at, run_cascade, Attempt, NormalizeError, NormalizeInput,
        Normalization, Strategy, CASCADE,
    };
    use crate::errors::DomainError;

    fn input(raw: &str) -> NormalizeInput<'_> {
        NormalizeInput {
            raw,
            original_problem: "2x+5=15",
            provider: "openai",
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).single().unwrap_or_default(),
        }
    }

    #[test]
    fn strict_json_reply_is_solved_by_first_strategy() {
        let raw = r#"{"solution": "x = 5", "steps": ["Step 1: ...", "Step 2: ..."]}"#;

        let outcome = run_cascade(&CASCADE, &input(raw));
        let Normalization::Solved { strategy, solution } = outcome else {
            panic!("expected a solved outcome, got {outcome:?}");
        };

        assert_eq!(strategy, "strict_json");
        assert_eq!(solution.solution_text(), "x = 5");
        assert_eq!(solution.steps(), ["Step 1: ...", "Step 2: ..."]);
        assert_eq!(solution.original_problem(), "2x+5=15");
        assert_eq!(solution.provider(), "openai");
    }

    #[test]
    fn error_key_declines_regardless_of_other_fields() {
        assert_eq!(normalize(r#"{"error": "not a math problem"}"#, "hello", "openai"), None);
        assert_eq!(
            normalize(
                r#"Sure! {"error": "Unable to solve", "solution": "42", "steps": ["Step 1: guess wildly"]}"#,
                "hello",
                "openai"
            ),
            None
        );
    }

    #[test]
    fn prose_reply_falls_through_to_heuristics() {
        let solution = normalize("The solution is 4. Step one: add 2 and 2.", "2+2", "gemini")
            .expect("heuristics always produce a solution");

        assert_eq!(solution.solution_text(), "4");
        assert_eq!(solution.steps(), ["Step one: add 2 and 2."]);
    }

    #[test]
    fn brace_free_text_never_normalizes_to_absent() {
        let samples = ["", "   ", "no idea", "42", "Answer: 7", "solution:\n\n", "...."];
        for sample in samples {
            let solution = normalize(sample, "p", "openai")
                .unwrap_or_else(|| panic!("absent for brace-free input {sample:?}"));
            assert!(!solution.solution_text().trim().is_empty());
        }
    }

    #[test]
    fn normalization_is_idempotent_apart_from_timestamp() {
        let samples = [
            r#"{"solution": "x = 5", "steps": ["Step 1: Subtract 5 from both sides", "tiny"]}"#,
            "Answer: 12\nFirst, multiply 3 by 4 to get 12.",
            r#"```json
{"solution": "y = 2", "steps": ["Step 1: Divide both sides by 3",],}
```"#,
        ];

        for sample in samples {
            let first = normalize(sample, "p", "openai").expect("solution");
            let second = normalize(sample, "p", "openai").expect("solution");
            assert!(first.same_content(&second), "differs for {sample:?}");
        }
    }

    #[test]
    fn explicit_timestamp_is_recorded() {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();
        let solution = normalize_at("Answer: 3", "1+2", "ollama", created_at).expect("solution");
        assert_eq!(solution.created_at(), created_at);
    }

    #[test]
    fn internal_fault_is_converted_to_failure() {
        fn faulty(_: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
            Err(NormalizeError::Domain(DomainError::EmptySolution))
        }
        fn never_reached(_: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
            Ok(Attempt::Pass { reason: "unreachable" })
        }

        let strategies = [
            Strategy { name: "faulty", run: faulty },
            Strategy { name: "never_reached", run: never_reached },
        ];
        let outcome = run_cascade(&strategies, &input("anything"));

        assert!(matches!(outcome, Normalization::Failed { .. }));
        assert_eq!(outcome.into_solution(), None);
    }

    #[test]
    fn exhausted_cascade_fails() {
        fn pass(_: &NormalizeInput<'_>) -> Result<Attempt, NormalizeError> {
            Ok(Attempt::Pass { reason: "nothing here" })
        }

        let outcome = run_cascade(&[Strategy { name: "pass", run: pass }], &input("x"));
        assert!(matches!(outcome, Normalization::Failed { .. }));
    }
}
