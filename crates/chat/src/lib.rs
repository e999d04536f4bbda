//! Chat surface for the tutor.
//!
//! - **Transport** (`transport`) - pluggable message source and sink, with a console implementation
//! - **Commands** (`commands`) - `/start`, `/help`, `/about`, `/status`
//! - **Events** (`events`) - text problems, photo problems and inline-button callbacks
//! - **Messages** (`messages`) - reply builder, demo questions and canned texts
//!
//! ```text
//! ChatTransport → ChatRunner → EventDispatcher → Handlers → ProblemService / CommandService
//!                      ↑                                              ↓
//!                      └──────────────── ReplyMessage ────────────────┘
//! ```

pub mod commands;
pub mod events;
pub mod messages;
pub mod transport;
