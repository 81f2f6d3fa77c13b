//! One pass of the fixpoint loop: snapshot, plan, attempt, commit.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::agent::{Agent, FailureRecord, UpdateRecord};
use crate::healing::Healed;
use crate::manifest::{self, Requirements};
use crate::util;
use crate::venv::Venv;
use crate::version;
use crate::AgentResult;
use crate::Context as _;

/// A planned upgrade of one pinned package.
#[derive(Debug)]
struct PlannedUpgrade {
    name: String,
    current: String,
    target: String,
    score: f64,
}

/// What a finished pass reports back to the run loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PassOutcome {
    /// At least one package ended the pass on a new, committed version.
    pub effective: bool,
    pub plan_was_empty: bool,
}

impl Agent<'_> {
    pub(crate) fn run_pass(&mut self, pass_num: u32) -> AgentResult<PassOutcome> {
        let _group = util::Group::open(&format!(
            "UPDATE PASS {pass_num}/{}",
            self.config.max_run_passes
        ));

        // Attempts read this immutable snapshot, never the live manifest.
        let snapshot = self
            .workdir
            .join(format!("pass_{pass_num}_baseline_reqs.txt"));
        fs::copy(&self.config.requirements_file, &snapshot).with_context(|| {
            format!("failed to snapshot the baseline to {}", snapshot.display())
        })?;

        let plan = self.build_plan(&snapshot)?;
        if plan.is_empty() {
            fs::remove_file(&snapshot).ok();
            return Ok(PassOutcome {
                effective: false,
                plan_was_empty: true,
            });
        }

        log::info!("prioritized update plan for this pass:");
        for (index, entry) in plan.iter().enumerate() {
            log::info!(
                "  {}/{}: {} (risk {:.2}) -> {}",
                index + 1,
                plan.len(),
                entry.name,
                entry.score,
                entry.target
            );
        }

        let mut accepted: IndexMap<String, String> = IndexMap::new();
        let mut changed: BTreeSet<String> = BTreeSet::new();

        for (index, entry) in plan.iter().enumerate() {
            log::info!(
                "[pass {pass_num} | attempt {}/{}] processing '{}'; changed so far: {changed:?}",
                index + 1,
                plan.len(),
                entry.name
            );
            let outcome = self.attempt_with_healing(
                &entry.name,
                &entry.current,
                &entry.target,
                &snapshot,
                !changed.is_empty(),
            )?;
            match outcome {
                Healed::Accepted(reached) => {
                    if reached != entry.current {
                        changed.insert(entry.name.clone());
                    }
                    accepted.insert(entry.name.clone(), reached.clone());
                    self.succeeded.insert(
                        entry.name.clone(),
                        UpdateRecord {
                            target: entry.target.clone(),
                            reached,
                        },
                    );
                }
                Healed::Failed(reason) => {
                    self.failed.insert(
                        entry.name.clone(),
                        FailureRecord {
                            target: entry.target.clone(),
                            reason,
                        },
                    );
                }
            }
        }

        let mut effective = !changed.is_empty();
        if effective && !self.commit_pass(&accepted, &snapshot)? {
            // The union refused to install even though every member passed
            // alone. The acceptances from this pass are void.
            for entry in &plan {
                if changed.contains(&entry.name) {
                    self.succeeded.shift_remove(&entry.name);
                    self.failed.insert(
                        entry.name.clone(),
                        FailureRecord {
                            target: entry.target.clone(),
                            reason: "Combined install failed at pass commit.".to_owned(),
                        },
                    );
                }
            }
            effective = false;
        }

        fs::remove_file(&snapshot).ok();
        Ok(PassOutcome {
            effective,
            plan_was_empty: false,
        })
    }

    /// Candidate upgrades: every exact pin whose latest release parses
    /// strictly greater than its current version, heaviest risk first.
    fn build_plan(&mut self, snapshot: &Path) -> AgentResult<Vec<PlannedUpgrade>> {
        let baseline = Requirements::load(snapshot)?;
        let mut plan = Vec::new();
        for pin in baseline.pins() {
            let Some(current) = version::parse_lenient(&pin.version) else {
                log::debug!(
                    "skipping {}: unparseable pinned version '{}'",
                    pin.name,
                    pin.version
                );
                continue;
            };
            let Some(latest) = self.probe.latest(&pin.name) else {
                continue;
            };
            if latest > current {
                let target = latest.to_string();
                let score = self.risk.score(&pin.name, &pin.version, &target);
                plan.push(PlannedUpgrade {
                    name: pin.name,
                    current: pin.version,
                    target,
                    score,
                });
            }
        }
        // Stable sort: equal scores keep their manifest order.
        plan.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(plan)
    }

    /// Apply every accepted version to the pass baseline, prove the union
    /// installs, and freeze it as the new baseline. When the combined
    /// install fails, restores the manifest verbatim and returns `false`.
    fn commit_pass(
        &mut self,
        accepted: &IndexMap<String, String>,
        snapshot: &Path,
    ) -> AgentResult<bool> {
        log::info!("applying successful changes from this pass");
        let mut combined = Requirements::load(snapshot)?;
        for (name, reached) in accepted {
            combined.set_pin(name, reached);
        }

        let venv = Venv::create(
            self.runner,
            &self.config.python,
            &self.workdir.join("temp_venv"),
        )?;
        let combined_path = venv.root().join("final_pass_reqs.txt");
        combined.save_as(&combined_path)?;

        let install = venv.install_file(self.runner, &combined_path)?;
        if !install.success() {
            util::warn("failed to install the combined updates at end of pass; reverting")?;
            log::debug!("combined install error:\n{}", install.stderr);
            fs::copy(snapshot, &self.config.requirements_file)
                .context("failed to restore the baseline manifest")?;
            return Ok(false);
        }

        let frozen = venv.freeze(self.runner)?;
        if !frozen.success() {
            util::warn("failed to freeze the combined environment; reverting")?;
            fs::copy(snapshot, &self.config.requirements_file)
                .context("failed to restore the baseline manifest")?;
            return Ok(false);
        }
        let pinned = manifest::prune_freeze(&frozen.stdout);
        manifest::write_atomic(&self.config.requirements_file, &(pinned + "\n"))?;
        util::status("Committed", "froze all successful updates for this pass")?;
        Ok(true)
    }
}
