//! Session orchestration.
//!
//! Ties the assistant runner to the session record store so that repeated
//! invocations for a feature continue the same conversation.

pub mod continuity;

pub use continuity::{ContinuityCoordinator, ResumePolicy, SessionRequest};
