//! The attempt engine: one install-and-validate probe of a single candidate.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::agent::Agent;
use crate::manifest::Requirements;
use crate::util;
use crate::validate;
use crate::venv::Venv;
use crate::AgentResult;

/// What one probe of `package==version` concluded.
#[derive(Debug)]
pub(crate) struct ProbeOutcome {
    pub ok: bool,
    /// Metrics (or the skip notice) on success, a reason otherwise.
    pub detail: String,
    /// Raw installer or validator output kept for diagnostics.
    pub log: String,
}

static CONFLICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Cannot install(.+?)because").expect("valid regex"));

impl Agent<'_> {
    /// Install the pass baseline with `package` moved to `version` into a
    /// fresh environment, then validate it. The authoritative manifest is
    /// never touched; every side effect stays inside the trial directory.
    pub(crate) fn try_install_and_validate(
        &mut self,
        package: &str,
        version: &str,
        baseline: &Path,
        any_changed: bool,
        is_probe: bool,
    ) -> AgentResult<ProbeOutcome> {
        let action = if is_probe { "Probing" } else { "Attempting" };
        util::status(action, &format!("{package}=={version}"))?;

        let venv = Venv::create(
            self.runner,
            &self.config.python,
            &self.workdir.join("temp_venv"),
        )?;

        let mut trial = Requirements::load(baseline)?;
        let recorded = trial
            .pins()
            .into_iter()
            .find(|pin| pin.name == package)
            .map(|pin| pin.version);
        trial.set_pin(package, version);
        let trial_path = venv.root().join("temp_requirements.txt");
        trial.save_as(&trial_path)?;

        let install = venv.install_file(self.runner, &trial_path)?;
        if !install.success() {
            log::info!("install failed; retrying with explicit requirements for verbose diagnostics");
            let verbose = venv.install_lines(self.runner, trial.lines())?;
            let reason = match CONFLICT.captures(&verbose.stderr) {
                Some(cap) => {
                    let packages = cap[1]
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace(" and ", ", ");
                    format!("Conflict between packages: {packages}")
                }
                None => match self.oracle.summarize_error(&install.stderr) {
                    Some(summary) => format!("Installation conflict. Summary: {summary}"),
                    None => "Installation conflict.".to_owned(),
                },
            };
            util::warn(&reason)?;
            return Ok(ProbeOutcome {
                ok: false,
                detail: reason,
                log: install.stderr,
            });
        }

        // Re-probing the baseline's own pin with nothing else changed this
        // pass exercises exactly the environment that already validated.
        if recorded.as_deref() == Some(version) && !any_changed {
            return Ok(ProbeOutcome {
                ok: true,
                detail: "Validation skipped (no change)".to_owned(),
                log: String::new(),
            });
        }

        let title = format!("Validation for {package}=={version}");
        let validation = validate::run(self.runner, venv.python(), self.config, &title)?;
        if !validation.ok {
            return Ok(ProbeOutcome {
                ok: false,
                detail: "Validation script failed".to_owned(),
                log: validation.output,
            });
        }
        Ok(ProbeOutcome {
            ok: true,
            detail: validation.report,
            log: String::new(),
        })
    }
}
