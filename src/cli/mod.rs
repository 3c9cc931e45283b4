//! CLI command handlers

pub mod commands;

pub use commands::{calculate, check, teams, validate};
