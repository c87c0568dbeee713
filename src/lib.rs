#![forbid(unsafe_code)]

//! Session continuity for an external coding assistant.
//!
//! Runs the assistant CLI as a child process, captures the conversation id
//! it reports, and persists one session record per feature so the next run
//! resumes the same conversation.

pub mod assistant;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod project;
pub mod status;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
