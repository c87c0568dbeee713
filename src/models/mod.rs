//! Domain model module declarations.

pub mod process;
pub mod session;
