//! CLI subcommand implementations for apk-evasion

pub mod attack;
pub mod classify;
pub mod config;
pub mod output;
pub mod paths;
