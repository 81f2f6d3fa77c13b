//! Agent configuration, loaded from a `requp.toml` file.

use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::Deserialize;
use url::Url;

use crate::AgentResult;
use crate::Context as _;

/// Everything the agent needs to know about one project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentConfig {
    /// Path to the authoritative requirements manifest.
    pub requirements_file: PathBuf,

    /// List of direct dependencies, one name per line, `#` comments allowed.
    /// Packages named here are considered primary for risk scoring.
    #[serde(default = "default_primary_requirements_file")]
    pub primary_requirements_file: PathBuf,

    /// Where the post-bootstrap and post-run metrics land.
    #[serde(default = "default_metrics_output_file")]
    pub metrics_output_file: PathBuf,

    /// Upper bound on the number of update passes.
    #[serde(default = "default_max_run_passes")]
    pub max_run_passes: u32,

    /// Oracle-suggested prior versions to consider per healing invocation.
    #[serde(default = "default_max_llm_backtrack_attempts")]
    pub max_llm_backtrack_attempts: usize,

    /// For test-suite validators, the tolerated number of failing tests.
    #[serde(default)]
    pub acceptable_failure_threshold: u32,

    /// Interpreter used to create isolated environments.
    #[serde(default = "default_python")]
    pub python: String,

    /// Base of the package index JSON API.
    #[serde(default = "default_index_url")]
    pub index_url: Url,

    /// Model queried for backtrack candidates and error summaries.
    #[serde(default = "default_oracle_model")]
    pub oracle_model: String,

    /// Root of the source tree scanned for import usage. Falls back to the
    /// validation's project directory, then the current directory.
    #[serde(default)]
    pub project_dir: Option<PathBuf>,

    pub validation: ValidationConfig,
}

/// The user-supplied validation procedure, in one of three shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum ValidationConfig {
    /// Run a binary pass/fail smoke-test script.
    Script { smoke_test_script: PathBuf },
    /// Run a pytest suite and judge its summary against the threshold.
    Pytest {
        pytest_target: String,
        project_dir: Option<PathBuf>,
    },
    /// Run the script first; only on its success run the suite and report
    /// the suite's metrics.
    SmokeTestWithPytestReport {
        smoke_test_script: PathBuf,
        pytest_target: String,
        project_dir: Option<PathBuf>,
    },
}

impl ValidationConfig {
    pub fn project_dir(&self) -> Option<&Path> {
        match self {
            ValidationConfig::Script { .. } => None,
            ValidationConfig::Pytest { project_dir, .. }
            | ValidationConfig::SmokeTestWithPytestReport { project_dir, .. } => {
                project_dir.as_deref()
            }
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> AgentResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&text)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Directory whose `*.py` files feed the usage scan.
    pub fn scan_root(&self) -> PathBuf {
        if let Some(dir) = &self.project_dir {
            return dir.clone();
        }
        if let Some(dir) = self.validation.project_dir() {
            return dir.to_owned();
        }
        PathBuf::from(".")
    }
}

fn default_primary_requirements_file() -> PathBuf {
    PathBuf::from("primary_requirements.txt")
}

fn default_metrics_output_file() -> PathBuf {
    PathBuf::from("metrics_output.txt")
}

fn default_max_run_passes() -> u32 {
    5
}

fn default_max_llm_backtrack_attempts() -> usize {
    3
}

fn default_python() -> String {
    "python3".to_owned()
}

fn default_index_url() -> Url {
    Url::parse("https://pypi.org/pypi").expect("valid url literal")
}

fn default_oracle_model() -> String {
    "gemini-1.5-flash-latest".to_owned()
}
