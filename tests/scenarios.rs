//! End-to-end runs of the update agent over scripted externals.
//!
//! The fakes below stand in for the interpreter, pip, the validator, the
//! package index, and the oracle, keyed on the argv each invocation
//! receives. Every test drives the real engine from `Agent::run`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use requp::config::AgentConfig;
use requp::oracle::{Oracle, OracleReply};
use requp::process::{CommandRunner, ToolOutput};
use requp::registry::Registry;
use requp::version::{parse_lenient, Version, VersionExt as _};
use requp::{Agent, AgentResult};

fn ok_output(stdout: &str) -> ToolOutput {
    ToolOutput {
        stdout: stdout.to_owned(),
        stderr: String::new(),
        code: 0,
    }
}

/// Scripted stand-in for every subprocess the agent spawns.
#[derive(Default)]
struct FakeTools {
    /// Requirement lines that make `pip install -r` fail.
    bad_installs: BTreeSet<String>,
    /// Line pairs that fail only when installed together.
    bad_pairs: Vec<(String, String)>,
    /// Requirement lines that install but break the smoke test.
    bad_validations: BTreeSet<String>,
    /// What the verbose (explicit-argument) install retry prints.
    verbose_stderr: String,
    /// Overrides the `pip freeze` output when set.
    freeze_override: Option<String>,
    /// Every `pip install -r` call as `(manifest path, line set)`, in order.
    install_log: RefCell<Vec<(String, Vec<String>)>>,
    /// The most recently installed line set.
    installed: RefCell<Vec<String>>,
}

impl FakeTools {
    /// First `-r` install whose line set contains `line`, if any.
    fn first_install_with(&self, line: &str) -> Option<usize> {
        self.install_log
            .borrow()
            .iter()
            .position(|(_, lines)| lines.iter().any(|candidate| candidate == line))
    }

    /// The pins probed for `name` through trial manifests, in install order.
    /// Health-check and commit installs use other file names and are skipped.
    fn attempted_pins_of(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name}==");
        self.install_log
            .borrow()
            .iter()
            .filter(|(path, _)| path.ends_with("temp_requirements.txt"))
            .flat_map(|(_, lines)| lines.iter())
            .filter(|line| line.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

impl CommandRunner for FakeTools {
    fn run(&self, argv: &[String], _cwd: Option<&Path>) -> AgentResult<ToolOutput> {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            [_python, "-m", "venv", _dir] => Ok(ok_output("")),
            [_python, "-m", "pip", "install", "-r", path] => {
                let lines: Vec<String> = fs::read_to_string(path)?
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_owned)
                    .collect();
                self.install_log
                    .borrow_mut()
                    .push(((*path).to_owned(), lines.clone()));

                if let Some(bad) = lines.iter().find(|line| self.bad_installs.contains(*line)) {
                    return Ok(ToolOutput {
                        stdout: String::new(),
                        stderr: format!("ERROR: ResolutionImpossible: {bad}"),
                        code: 1,
                    });
                }
                for (left, right) in &self.bad_pairs {
                    if lines.iter().any(|line| line == left)
                        && lines.iter().any(|line| line == right)
                    {
                        return Ok(ToolOutput {
                            stdout: String::new(),
                            stderr: format!("ERROR: ResolutionImpossible: {left} with {right}"),
                            code: 1,
                        });
                    }
                }
                *self.installed.borrow_mut() = lines;
                Ok(ok_output(""))
            }
            [_python, "-m", "pip", "install", ..] => Ok(ToolOutput {
                stdout: String::new(),
                stderr: self.verbose_stderr.clone(),
                code: 1,
            }),
            [_python, "-m", "pip", "freeze"] => {
                let frozen = match &self.freeze_override {
                    Some(text) => text.clone(),
                    None => self.installed.borrow().join("\n") + "\n",
                };
                Ok(ok_output(&frozen))
            }
            [_python, _script] => {
                let installed = self.installed.borrow();
                if let Some(bad) = installed
                    .iter()
                    .find(|line| self.bad_validations.contains(*line))
                {
                    return Ok(ToolOutput {
                        stdout: format!("broken by {bad}"),
                        stderr: String::new(),
                        code: 1,
                    });
                }
                Ok(ok_output("Smoke Test: all probes passed\n"))
            }
            other => anyhow::bail!("unexpected command: {other:?}"),
        }
    }
}

#[derive(Default)]
struct FakeRegistry {
    releases: BTreeMap<String, Vec<&'static str>>,
}

impl FakeRegistry {
    fn new() -> Self {
        FakeRegistry::default()
    }

    fn with(mut self, name: &str, versions: &[&'static str]) -> Self {
        self.releases.insert(name.to_owned(), versions.to_vec());
        self
    }
}

impl Registry for FakeRegistry {
    fn list_versions(&self, name: &str) -> Vec<(Version, bool)> {
        self.releases
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|raw| parse_lenient(raw))
            .map(|version| {
                let prerelease = !version.is_stable();
                (version, prerelease)
            })
            .collect()
    }
}

struct FakeOracle {
    replies: RefCell<Vec<OracleReply>>,
    calls: Cell<u32>,
}

impl FakeOracle {
    fn with_replies(replies: Vec<OracleReply>) -> Self {
        FakeOracle {
            replies: RefCell::new(replies),
            calls: Cell::new(0),
        }
    }
}

impl Oracle for FakeOracle {
    fn generate(&self, _prompt: &str) -> OracleReply {
        self.calls.set(self.calls.get() + 1);
        let mut replies = self.replies.borrow_mut();
        if replies.is_empty() {
            OracleReply::Failed
        } else {
            replies.remove(0)
        }
    }
}

struct Sandbox {
    dir: TempDir,
    config: AgentConfig,
}

impl Sandbox {
    fn new(manifest: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), manifest).unwrap();
        fs::write(dir.path().join("smoke.py"), "print('Smoke Test: ok')\n").unwrap();

        let config_text = format!(
            r#"
requirements-file = "{root}/requirements.txt"
primary-requirements-file = "{root}/primary_requirements.txt"
metrics-output-file = "{root}/metrics_output.txt"
project-dir = "{root}"
max-run-passes = 5

[validation]
type = "script"
smoke-test-script = "{root}/smoke.py"
"#,
            root = dir.path().display()
        );
        let config_path = dir.path().join("requp.toml");
        fs::write(&config_path, config_text).unwrap();
        let config = AgentConfig::load(&config_path).unwrap();
        Sandbox { dir, config }
    }

    fn workdir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn manifest(&self) -> String {
        fs::read_to_string(self.dir.path().join("requirements.txt")).unwrap()
    }
}

#[test]
fn clean_upgrades_converge_in_one_pass() {
    let sandbox = Sandbox::new("A==1.0.0\nB==2.1.0\n");
    let tools = FakeTools::default();
    let registry = FakeRegistry::new()
        .with("a", &["1.0.0", "1.0.1"])
        .with("b", &["2.1.0", "2.2.0"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "A==1.0.1\nB==2.2.0\n");
    let successes = agent.successful_updates();
    assert_eq!(successes.len(), 2);
    assert_eq!(successes["a"].reached, "1.0.1");
    assert_eq!(successes["b"].reached, "2.2.0");
    assert!(agent.failed_updates().is_empty());
}

#[test]
fn risky_upgrades_are_attempted_first() {
    let sandbox = Sandbox::new("low==1.0.0\nhigh==1.0.0\n");
    let tools = FakeTools::default();
    let registry = FakeRegistry::new()
        .with("low", &["1.0.0", "1.0.1"])
        .with("high", &["1.0.0", "2.0.0"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    // The major jump outranks the patch bump despite its manifest position.
    let high_first = tools.first_install_with("high==2.0.0").unwrap();
    let low_first = tools.first_install_with("low==1.0.1").unwrap();
    assert!(high_first < low_first);
}

#[test]
fn oracle_suggestion_heals_a_conflicting_target() {
    let sandbox = Sandbox::new("X==1.2.3\n");
    let tools = FakeTools {
        bad_installs: BTreeSet::from(["X==2.0.0".to_owned()]),
        verbose_stderr: "ERROR: Cannot install x and dependency-b because these package \
                         versions have conflicting dependencies."
            .to_owned(),
        ..Default::default()
    };
    let registry = FakeRegistry::new().with("x", &["1.2.3", "1.9.4", "1.9.5", "2.0.0"]);
    let oracle = FakeOracle::with_replies(vec![OracleReply::Text(
        "[\"1.9.5\", \"1.9.4\"]".to_owned(),
    )]);

    let mut agent = Agent::new(
        &sandbox.config,
        &tools,
        &registry,
        Some(&oracle),
        sandbox.workdir(),
    )
    .unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "X==1.9.5\n");
    assert_eq!(agent.successful_updates()["x"].target, "2.0.0");
    assert_eq!(agent.successful_updates()["x"].reached, "1.9.5");
    // Never probed below the first passing suggestion.
    assert!(tools.first_install_with("X==1.9.4").is_none());
}

#[test]
fn exhausted_backtracking_leaves_the_baseline_alone() {
    let sandbox = Sandbox::new("Y==1.0.0\n");
    let tools = FakeTools {
        bad_installs: BTreeSet::from([
            "Y==1.0.1".to_owned(),
            "Y==1.0.2".to_owned(),
            "Y==1.0.3".to_owned(),
            "Y==1.0.4".to_owned(),
            "Y==1.0.5".to_owned(),
        ]),
        ..Default::default()
    };
    let registry = FakeRegistry::new().with("y", &["1.0.0", "1.0.1", "1.0.2", "1.0.3", "1.0.4", "1.0.5"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "Y==1.0.0\n");
    assert!(agent.successful_updates().is_empty());
    assert_eq!(
        agent.failed_updates()["y"].reason,
        "All backtracking attempts failed."
    );
    assert_eq!(agent.failed_updates()["y"].target, "1.0.5");
    // Target first, then the interval ladder top-down, closed by the
    // current version as the sanity sentinel.
    assert_eq!(
        tools.attempted_pins_of("Y"),
        [
            "Y==1.0.5", "Y==1.0.4", "Y==1.0.3", "Y==1.0.2", "Y==1.0.1", "Y==1.0.0"
        ]
    );
}

#[test]
fn unpinned_manifest_is_bootstrapped_and_frozen() {
    let sandbox = Sandbox::new("Z>=1.0\n");
    let tools = FakeTools {
        freeze_override: Some("z==1.3.7\nidna==3.4\n".to_owned()),
        ..Default::default()
    };
    let registry = FakeRegistry::new().with("z", &["1.3.7"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "z==1.3.7\nidna==3.4\n");
    let metrics = fs::read_to_string(sandbox.dir.path().join("metrics_output.txt")).unwrap();
    assert_eq!(metrics, "all probes passed");
}

#[test]
fn bootstrap_install_failure_is_fatal() {
    let sandbox = Sandbox::new("Z>=1.0\n");
    let tools = FakeTools {
        bad_installs: BTreeSet::from(["Z>=1.0".to_owned()]),
        ..Default::default()
    };
    let registry = FakeRegistry::new();

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    let err = agent.run().unwrap_err();
    assert!(err.to_string().contains("bootstrap installation failed"));
    assert_eq!(sandbox.manifest(), "Z>=1.0\n");
}

#[test]
fn combined_commit_failure_restores_the_baseline() {
    let sandbox = Sandbox::new("a==1.0.0\nb==1.0.0\n");
    let tools = FakeTools {
        bad_pairs: vec![("a==1.1.0".to_owned(), "b==1.1.0".to_owned())],
        ..Default::default()
    };
    let registry = FakeRegistry::new()
        .with("a", &["1.0.0", "1.1.0"])
        .with("b", &["1.0.0", "1.1.0"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "a==1.0.0\nb==1.0.0\n");
    assert!(agent.successful_updates().is_empty());
    assert_eq!(
        agent.failed_updates()["a"].reason,
        "Combined install failed at pass commit."
    );
    assert_eq!(
        agent.failed_updates()["b"].reason,
        "Combined install failed at pass commit."
    );
}

#[test]
fn quota_exhaustion_latches_for_the_rest_of_the_run() {
    let sandbox = Sandbox::new("p==1.0.0\nq==1.0.0\n");
    let tools = FakeTools {
        bad_installs: BTreeSet::from(["p==2.0.0".to_owned(), "q==2.0.0".to_owned()]),
        verbose_stderr: "ERROR: Cannot install p and helper because of pins.".to_owned(),
        ..Default::default()
    };
    let registry = FakeRegistry::new()
        .with("p", &["1.0.0", "2.0.0"])
        .with("q", &["1.0.0", "2.0.0"]);
    let oracle = FakeOracle::with_replies(vec![OracleReply::QuotaExhausted]);

    let mut agent = Agent::new(
        &sandbox.config,
        &tools,
        &registry,
        Some(&oracle),
        sandbox.workdir(),
    )
    .unwrap();
    agent.run().unwrap();

    // The second healing never reaches the oracle.
    assert_eq!(oracle.calls.get(), 1);
    assert_eq!(agent.failed_updates().len(), 2);
    assert_eq!(sandbox.manifest(), "p==1.0.0\nq==1.0.0\n");
}

#[test]
fn empty_manifest_converges_immediately() {
    let sandbox = Sandbox::new("");
    let tools = FakeTools::default();
    let registry = FakeRegistry::new();

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "");
    assert!(agent.successful_updates().is_empty());
    assert!(agent.failed_updates().is_empty());
}

#[test]
fn editable_only_manifest_has_no_candidates() {
    let sandbox = Sandbox::new("-e ./local/pkg\n");
    let tools = FakeTools::default();
    let registry = FakeRegistry::new();

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "-e ./local/pkg\n");
    assert!(agent.successful_updates().is_empty());
}

#[test]
fn extras_qualified_pins_are_upgraded() {
    let sandbox = Sandbox::new("requests[socks]==2.31.0\n");
    let tools = FakeTools::default();
    let registry = FakeRegistry::new().with("requests", &["2.31.0", "2.32.0"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    // The bare name drives registry identity; the extras survive rewriting.
    assert_eq!(sandbox.manifest(), "requests[socks]==2.32.0\n");
    assert_eq!(agent.successful_updates()["requests"].reached, "2.32.0");
}

#[test]
fn validation_failures_trigger_healing_too() {
    // The target installs fine but breaks the smoke test; healing walks
    // back to the newest release that both installs and validates.
    let sandbox = Sandbox::new("w==1.0.0\n");
    let tools = FakeTools {
        bad_validations: BTreeSet::from(["w==1.2.0".to_owned()]),
        ..Default::default()
    };
    let registry = FakeRegistry::new().with("w", &["1.0.0", "1.1.0", "1.2.0"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    assert_eq!(sandbox.manifest(), "w==1.1.0\n");
    assert_eq!(agent.successful_updates()["w"].target, "1.2.0");
    assert_eq!(agent.successful_updates()["w"].reached, "1.1.0");
}

#[test]
fn accepted_versions_never_move_backwards() {
    let sandbox = Sandbox::new("a==1.0.0\nb==2.0.0\nc==3.0.0\n");
    let tools = FakeTools {
        bad_installs: BTreeSet::from(["b==2.9.0".to_owned()]),
        ..Default::default()
    };
    let registry = FakeRegistry::new()
        .with("a", &["1.0.0", "1.4.0"])
        .with("b", &["2.0.0", "2.5.0", "2.9.0"])
        .with("c", &["3.0.0"]);

    let mut agent = Agent::new(&sandbox.config, &tools, &registry, None, sandbox.workdir()).unwrap();
    agent.run().unwrap();

    let before: BTreeMap<&str, Version> = [
        ("a", parse_lenient("1.0.0").unwrap()),
        ("b", parse_lenient("2.0.0").unwrap()),
        ("c", parse_lenient("3.0.0").unwrap()),
    ]
    .into_iter()
    .collect();
    for (name, record) in agent.successful_updates() {
        let reached = parse_lenient(&record.reached).unwrap();
        assert!(reached >= before[name.as_str()], "{name} moved backwards");
    }
    assert_eq!(sandbox.manifest(), "a==1.4.0\nb==2.5.0\nc==3.0.0\n");
}
