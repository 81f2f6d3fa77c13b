//! The run context: bootstrap, the pass loop, health checks, and the final
//! summary.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use termcolor::Color;

use crate::config::AgentConfig;
use crate::manifest::{self, Requirements};
use crate::oracle::{Oracle, OracleHandle};
use crate::process::CommandRunner;
use crate::registry::{Registry, RegistryProbe};
use crate::risk::RiskContext;
use crate::usage;
use crate::util;
use crate::validate;
use crate::venv::Venv;
use crate::AgentResult;
use crate::Context as _;

/// One accepted upgrade in the run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    /// The latest release the plan asked for.
    pub target: String,
    /// The release that actually installed and validated.
    pub reached: String,
}

/// One abandoned upgrade in the run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub target: String,
    pub reason: String,
}

/// The update agent. Owns the run state and drives every pass; all external
/// effects go through the runner, registry, and oracle seams it was built
/// with.
pub struct Agent<'a> {
    pub(crate) config: &'a AgentConfig,
    pub(crate) runner: &'a dyn CommandRunner,
    pub(crate) probe: RegistryProbe<'a>,
    pub(crate) oracle: OracleHandle<'a>,
    pub(crate) risk: RiskContext,
    pub(crate) workdir: PathBuf,
    pub(crate) succeeded: IndexMap<String, UpdateRecord>,
    pub(crate) failed: IndexMap<String, FailureRecord>,
}

impl<'a> Agent<'a> {
    pub fn new(
        config: &'a AgentConfig,
        runner: &'a dyn CommandRunner,
        registry: &'a dyn Registry,
        oracle: Option<&'a dyn Oracle>,
        workdir: PathBuf,
    ) -> AgentResult<Self> {
        let primary = load_primary_packages(&config.primary_requirements_file)?;
        let scan_root = config.scan_root();
        let usage = if scan_root.is_dir() {
            usage::scan(&scan_root)
        } else {
            Default::default()
        };
        log::debug!(
            "risk inputs ready: {} packages imported, {} primary",
            usage.len(),
            primary.len()
        );

        Ok(Agent {
            config,
            runner,
            probe: RegistryProbe::new(registry),
            oracle: OracleHandle::new(oracle),
            risk: RiskContext { usage, primary },
            workdir,
            succeeded: IndexMap::new(),
            failed: IndexMap::new(),
        })
    }

    /// Upgrades that installed and validated, in acceptance order.
    pub fn successful_updates(&self) -> &IndexMap<String, UpdateRecord> {
        &self.succeeded
    }

    /// Upgrades abandoned after healing ran dry, in failure order.
    pub fn failed_updates(&self) -> &IndexMap<String, FailureRecord> {
        &self.failed
    }

    /// Drive the whole run: bootstrap if needed, then passes until a fixpoint
    /// or the cap, then the final health check.
    pub fn run(&mut self) -> AgentResult<()> {
        if self.config.metrics_output_file.exists() {
            fs::remove_file(&self.config.metrics_output_file).ok();
        }

        let baseline = Requirements::load(&self.config.requirements_file)?;
        if !baseline.is_fully_pinned() {
            self.bootstrap()?;
            let rebuilt = Requirements::load(&self.config.requirements_file)?;
            anyhow::ensure!(
                rebuilt.is_fully_pinned(),
                "bootstrap failed to produce a fully pinned requirements file"
            );
        }

        // Confirm the starting baseline is green before touching anything.
        self.health_check(false)?;

        let mut pass_num = 0;
        while pass_num < self.config.max_run_passes {
            pass_num += 1;
            let outcome = self.run_pass(pass_num)?;
            if outcome.plan_was_empty {
                if pass_num == 1 {
                    util::note(
                        "the baseline is already fully up to date; the upstream resolver found the optimal versions",
                    )?;
                } else {
                    util::note("no further updates are available; the system has converged")?;
                }
                break;
            }
            if !outcome.effective {
                util::note(
                    "no effective version changes were possible in this pass; the system has converged",
                )?;
                break;
            }
        }

        self.print_summary()?;
        self.health_check(true)
    }

    /// Establish a validated, fully pinned baseline from an unpinned
    /// manifest. Any failure here is fatal; without a green baseline there is
    /// nothing to mutate.
    fn bootstrap(&mut self) -> AgentResult<()> {
        let _group = util::Group::open("BOOTSTRAP: establishing a stable baseline");
        log::info!("unpinned requirements detected; creating and validating a stable baseline");

        let venv = Venv::create(
            self.runner,
            &self.config.python,
            &self.workdir.join("bootstrap_venv"),
        )?;
        let install = venv.install_file(self.runner, &self.config.requirements_file)?;
        if !install.success() {
            log::error!("initial dependency install failed:\n{}", install.stderr);
            anyhow::bail!("bootstrap installation failed");
        }

        let validation = validate::run(
            self.runner,
            venv.python(),
            self.config,
            "Running validation on the new baseline",
        )?;
        if !validation.ok {
            log::error!("baseline validation output:\n{}", validation.output);
            anyhow::bail!("initial dependencies passed installation but failed validation");
        }

        let frozen = venv.freeze(self.runner)?;
        anyhow::ensure!(
            frozen.success(),
            "failed to freeze the bootstrap environment: {}",
            frozen.stderr.trim()
        );
        let pinned = manifest::prune_freeze(&frozen.stdout);
        manifest::write_atomic(&self.config.requirements_file, &(pinned + "\n"))?;
        util::status(
            "Bootstrapped",
            &format!("baseline written to {}", self.config.requirements_file.display()),
        )?;

        self.persist_metrics(&validation.report)
    }

    /// Fresh environment, authoritative manifest, full validation. Failures
    /// are reported but never abort the run.
    fn health_check(&mut self, persist: bool) -> AgentResult<()> {
        let _group = util::Group::open("SYSTEM HEALTH CHECK");
        let venv = Venv::create(
            self.runner,
            &self.config.python,
            &self.workdir.join("final_venv"),
        )?;
        let install = venv.install_file(self.runner, &self.config.requirements_file)?;
        if !install.success() {
            util::warn("installation of the combined dependencies failed")?;
            log::error!("health-check install error:\n{}", install.stderr);
            return Ok(());
        }

        let validation = validate::run(
            self.runner,
            venv.python(),
            self.config,
            "System health check",
        )?;
        if !validation.ok {
            util::warn("health-check validation failed")?;
            return Ok(());
        }
        if validation.report.is_empty() || validation.report.contains("not available") {
            log::info!("validation passed (no metrics)");
            return Ok(());
        }
        for line in validation.report.lines() {
            log::info!("  {line}");
        }
        if persist {
            self.persist_metrics(&validation.report)?;
        }
        Ok(())
    }

    /// Write the metrics report unless the validator marked it unavailable.
    pub(crate) fn persist_metrics(&self, report: &str) -> AgentResult<()> {
        if report.is_empty() || report.contains("not available") {
            return Ok(());
        }
        fs::write(&self.config.metrics_output_file, report).with_context(|| {
            format!("failed to write {}", self.config.metrics_output_file.display())
        })?;
        Ok(())
    }

    /// Render the overall run summary in aligned columns.
    fn print_summary(&self) -> AgentResult<()> {
        if self.succeeded.is_empty() && self.failed.is_empty() {
            return Ok(());
        }
        util::status("Summary", "overall update run")?;

        if !self.succeeded.is_empty() {
            util::status("Updated", "the following packages")?;
            let mut rows = vec![[
                "Package".to_owned(),
                "Target Version".to_owned(),
                "Reached Version".to_owned(),
            ]];
            rows.extend(self.succeeded.iter().map(|(name, record)| {
                [name.clone(), record.target.clone(), record.reached.clone()]
            }));
            util::table(&rows, Color::Green)?;
        }

        if !self.failed.is_empty() {
            util::warn("updates were attempted but failed for")?;
            let mut rows = vec![[
                "Package".to_owned(),
                "Target Version".to_owned(),
                "Reason for Failure".to_owned(),
            ]];
            rows.extend(self.failed.iter().map(|(name, record)| {
                [name.clone(), record.target.clone(), record.reason.clone()]
            }));
            util::table(&rows, Color::Yellow)?;
        }
        Ok(())
    }
}

fn load_primary_packages(path: &Path) -> AgentResult<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(manifest::extract_name)
        .collect())
}
