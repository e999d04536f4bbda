use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Algebra,
    Calculus,
    Geometry,
    Statistics,
    Trigonometry,
    Arithmetic,
    Other,
    Unknown,
}

impl ProblemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Algebra => "algebra",
            Self::Calculus => "calculus",
            Self::Geometry => "geometry",
            Self::Statistics => "statistics",
            Self::Trigonometry => "trigonometry",
            Self::Arithmetic => "arithmetic",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse of a model-supplied label. Blank means the model said
    /// nothing; anything unrecognised is still *some* kind of problem.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(normalize_label) {
            None => Self::Unknown,
            Some(label) if label.is_empty() => Self::Unknown,
            Some(label) => label.parse().unwrap_or(Self::Other),
        }
    }
}

impl FromStr for ProblemType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_label(value).as_str() {
            "algebra" => Ok(Self::Algebra),
            "calculus" => Ok(Self::Calculus),
            "geometry" => Ok(Self::Geometry),
            "statistics" => Ok(Self::Statistics),
            "trigonometry" => Ok(Self::Trigonometry),
            "arithmetic" => Ok(Self::Arithmetic),
            "other" => Ok(Self::Other),
            "unknown" => Ok(Self::Unknown),
            other => Err(DomainError::UnknownLabel { kind: "problem_type", label: other.to_owned() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Elementary,
    MiddleSchool,
    HighSchool,
    College,
    Graduate,
    Unknown,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elementary => "elementary",
            Self::MiddleSchool => "middle_school",
            Self::HighSchool => "high_school",
            Self::College => "college",
            Self::Graduate => "graduate",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_label(label: Option<&str>) -> Self {
        label.and_then(|label| label.parse().ok()).unwrap_or(Self::Unknown)
    }
}

impl FromStr for Difficulty {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_label(value).as_str() {
            "elementary" => Ok(Self::Elementary),
            "middle_school" => Ok(Self::MiddleSchool),
            "high_school" => Ok(Self::HighSchool),
            "college" => Ok(Self::College),
            "graduate" => Ok(Self::Graduate),
            "unknown" => Ok(Self::Unknown),
            other => Err(DomainError::UnknownLabel { kind: "difficulty", label: other.to_owned() }),
        }
    }
}

fn normalize_label(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// A validated, structured answer to one math problem.
///
/// Fields are private: the only way in is [`SolutionDraft::finish`], which
/// refuses an empty `solution_text`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Solution {
    original_problem: String,
    problem_type: ProblemType,
    difficulty: Difficulty,
    solution_text: String,
    steps: Vec<String>,
    explanation: Option<String>,
    key_concepts: Vec<String>,
    provider: String,
    created_at: DateTime<Utc>,
}

impl Solution {
    pub fn original_problem(&self) -> &str {
        &self.original_problem
    }

    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn solution_text(&self) -> &str {
        &self.solution_text
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub fn key_concepts(&self) -> &[String] {
        &self.key_concepts
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Equality that ignores `created_at`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.original_problem == other.original_problem
            && self.problem_type == other.problem_type
            && self.difficulty == other.difficulty
            && self.solution_text == other.solution_text
            && self.steps == other.steps
            && self.explanation == other.explanation
            && self.key_concepts == other.key_concepts
            && self.provider == other.provider
    }
}

/// Content extracted by a normalization strategy, before metadata and
/// invariant checks are applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolutionDraft {
    pub problem_type: ProblemType,
    pub difficulty: Difficulty,
    pub solution_text: String,
    pub steps: Vec<String>,
    pub explanation: Option<String>,
    pub key_concepts: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolutionMetadata<'a> {
    pub original_problem: &'a str,
    pub provider: &'a str,
    pub created_at: DateTime<Utc>,
}

impl SolutionDraft {
    pub fn finish(self, metadata: &SolutionMetadata<'_>) -> Result<Solution, DomainError> {
        let solution_text = self.solution_text.trim();
        if solution_text.is_empty() {
            return Err(DomainError::EmptySolution);
        }

        Ok(Solution {
            original_problem: metadata.original_problem.to_owned(),
            problem_type: self.problem_type,
            difficulty: self.difficulty,
            solution_text: solution_text.to_owned(),
            steps: self.steps,
            explanation: self.explanation,
            key_concepts: self.key_concepts,
            provider: metadata.provider.to_owned(),
            created_at: metadata.created_at,
        })
    }
}
