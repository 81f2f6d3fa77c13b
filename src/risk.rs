//! Priority scoring for candidate upgrades.

use std::collections::{BTreeSet, HashMap};

use crate::version;

/// What the scorer knows about the project: import counts per package and
/// the set of direct dependencies.
#[derive(Debug, Default)]
pub(crate) struct RiskContext {
    pub(crate) usage: HashMap<String, u32>,
    pub(crate) primary: BTreeSet<String>,
}

impl RiskContext {
    /// Weighted priority of moving `name` from `current` to `target`.
    ///
    /// Heavier scores run earlier: widely imported packages, direct
    /// dependencies, and large version jumps get probed first so later
    /// passes can cheaply layer the easy upgrades on top of them.
    pub(crate) fn score(&self, name: &str, current: &str, target: &str) -> f64 {
        let usage = f64::from(self.usage.get(name).copied().unwrap_or(0));
        let primary = if self.primary.contains(name) { 1.0 } else { 0.0 };
        let severity = f64::from(version::bump_severity(current, target));
        usage * 5.0 + primary * 3.0 + severity * 2.0
    }
}
