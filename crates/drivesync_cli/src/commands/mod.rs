//! CLI command implementations.

pub mod status;
pub mod token;
pub mod write;
