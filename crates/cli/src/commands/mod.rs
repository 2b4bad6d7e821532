//! CLI subcommand implementations

pub mod health;
pub mod jobs;
pub mod metadata;
