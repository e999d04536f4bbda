//! Tutor agent: the collaborators around the core and the runtime that
//! drives one solve request through them.
//!
//! - `llm` provider clients (OpenAI-compatible, Gemini, Ollama)
//! - `ocr` text extraction from photographed problems
//! - `guardrails` content screening and input sanitizing
//! - `conversation` exchange log
//! - `render` chat formatting of solutions
//! - `runtime` orchestration

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod ocr;
pub mod render;
pub mod runtime;

pub use runtime::{TutorReply, TutorRuntime};
