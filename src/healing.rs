//! Backtracking fallback for failed upgrade attempts.
//!
//! Healing runs in two stages. The oracle usually names the handful of
//! widely-used prior releases and catches the common case in one or two
//! probes; the descending interval scan is the deterministic safety net.

use std::path::Path;

use crate::agent::Agent;
use crate::util;
use crate::version;
use crate::AgentResult;

/// Final word on one planned upgrade.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Healed {
    /// This release (the target or an older one) installed and validated.
    Accepted(String),
    Failed(String),
}

impl Agent<'_> {
    /// Try the target, then oracle-suggested prior releases, then the
    /// descending scan of the release interval.
    pub(crate) fn attempt_with_healing(
        &mut self,
        package: &str,
        current: &str,
        target: &str,
        baseline: &Path,
        any_changed: bool,
    ) -> AgentResult<Healed> {
        let first = self.try_install_and_validate(package, target, baseline, any_changed, false)?;
        if first.ok {
            return Ok(Healed::Accepted(target.to_owned()));
        }

        log::info!("initial update for '{package}' failed: {}", first.detail);
        if !first.log.is_empty() {
            log::debug!("full error log for the initial failure:\n{}", first.log);
        }
        util::note(&format!("entering healing mode for {package}"))?;

        if let Some(found) =
            self.oracle_backtrack(package, current, target, baseline, any_changed)?
        {
            return Ok(Healed::Accepted(found));
        }
        if let Some(found) =
            self.interval_backtrack(package, current, target, baseline, any_changed)?
        {
            return Ok(Healed::Accepted(found));
        }
        Ok(Healed::Failed("All backtracking attempts failed.".to_owned()))
    }

    /// Stage 1: probe the releases the oracle believes preceded `target`,
    /// newest first. Suggestions at or below the current version are noise.
    fn oracle_backtrack(
        &mut self,
        package: &str,
        current: &str,
        target: &str,
        baseline: &Path,
        any_changed: bool,
    ) -> AgentResult<Option<String>> {
        let limit = self.config.max_llm_backtrack_attempts;
        let suggestions = self.oracle.version_candidates(package, target, limit);
        if suggestions.is_empty() {
            return Ok(None);
        }

        let floor = version::parse_lenient(current);
        for candidate in suggestions.into_iter().take(limit) {
            let Some(parsed) = version::parse_lenient(&candidate) else {
                log::debug!("discarding unparseable oracle suggestion '{candidate}'");
                continue;
            };
            if let Some(floor) = &floor {
                if parsed <= *floor {
                    continue;
                }
            }
            log::info!("attempting oracle-suggested backtrack for {package} to {candidate}");
            let probe =
                self.try_install_and_validate(package, &candidate, baseline, any_changed, false)?;
            if probe.ok {
                return Ok(Some(candidate));
            }
        }
        log::info!("oracle suggestions exhausted; falling back to the interval scan");
        Ok(None)
    }

    /// Stage 2: walk the stable releases in `[current, target)` from the top
    /// down and accept the first that passes.
    ///
    /// The scan is linear: it yields the greatest release below the failed
    /// target that still works. The current version closes the
    /// ladder; when it is the first one to pass, nothing newer works and the
    /// healing attempt has failed rather than found a no-op.
    fn interval_backtrack(
        &mut self,
        package: &str,
        current: &str,
        target: &str,
        baseline: &Path,
        any_changed: bool,
    ) -> AgentResult<Option<String>> {
        let _group = util::Group::open(&format!("Backtracking {package} below {target}"));
        let (Some(floor), Some(ceiling)) =
            (version::parse_lenient(current), version::parse_lenient(target))
        else {
            return Ok(None);
        };

        let mut ladder = self.probe.stable_range(package, &floor, &ceiling);
        if !ladder.contains(&floor) {
            ladder.insert(0, floor.clone());
        }

        for candidate in ladder.iter().rev() {
            let text = candidate.to_string();
            let probe = self.try_install_and_validate(package, &text, baseline, any_changed, true)?;
            if !probe.ok {
                log::info!("version {text} failed the probe: {}", probe.detail);
                continue;
            }
            if *candidate == floor {
                log::info!("only the current version {text} still passes; no upgrade found");
                return Ok(None);
            }
            util::status("Found", &format!("newest passing release {package}=={text}"))?;
            return Ok(Some(text));
        }
        Ok(None)
    }
}
