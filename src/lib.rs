//! Core engine of `requp`, an autonomous updater for pinned Python
//! requirements files.
//!
//! The agent plans risk-ordered upgrades from the registry, probes each one
//! by installing and validating a single-variable mutation of the baseline in
//! a throwaway virtualenv, heals failed upgrades by backtracking through the
//! release history, and commits a pass only once the combined result installs
//! and freezes cleanly.

mod agent;
mod attempt;
pub mod config;
mod healing;
pub mod manifest;
pub mod oracle;
mod pass;
pub mod process;
pub mod registry;
mod risk;
mod usage;
pub mod util;
pub mod validate;
pub mod venv;
pub mod version;

pub use agent::{Agent, FailureRecord, UpdateRecord};
pub use anyhow::Context;

/// Crate-wide result type.
pub type AgentResult<T> = anyhow::Result<T>;
