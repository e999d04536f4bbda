pub mod config;
pub mod domain;
pub mod errors;
pub mod governor;
pub mod normalizer;
pub mod prompt;
pub mod text;

pub use config::{AppConfig, ConfigError, LlmProvider, LoadOptions};
pub use domain::caller::CallerId;
pub use domain::solution::{Difficulty, ProblemType, Solution, SolutionDraft};
pub use errors::{DomainError, IoSource, SolveError};
pub use governor::{
    Admission, CallerStatus, GovernorConfig, GovernorStatistics, GovernorSweeper, SweepReport,
    SweeperHandle, UsageGovernor,
};
pub use normalizer::{normalize, normalize_at, run_cascade, Normalization, CASCADE};
pub use text::normalize_ocr_text;
