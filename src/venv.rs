//! Isolated virtualenv creation and pip plumbing.

use std::fs;
use std::path::{Path, PathBuf};

use crate::process::{CommandRunner, ToolOutput};
use crate::AgentResult;
use crate::Context as _;

/// A freshly created virtual environment, exclusively owned by its creator.
#[derive(Debug)]
pub struct Venv {
    root: PathBuf,
    python: PathBuf,
}

impl Venv {
    /// Destroy whatever lives at `root` and create a fresh environment there.
    pub fn create(runner: &dyn CommandRunner, python: &str, root: &Path) -> AgentResult<Self> {
        if root.exists() {
            fs::remove_dir_all(root)
                .with_context(|| format!("failed to clear {}", root.display()))?;
        }
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create {}", root.display()))?;
        let root = dunce::canonicalize(root)
            .with_context(|| format!("failed to resolve {}", root.display()))?;

        let created = runner.run(
            &[
                python.to_owned(),
                "-m".to_owned(),
                "venv".to_owned(),
                root.display().to_string(),
            ],
            None,
        )?;
        anyhow::ensure!(
            created.success(),
            "failed to create a virtualenv at {}: {}",
            root.display(),
            created.stderr.trim()
        );

        let python = if cfg!(windows) {
            root.join("Scripts").join("python.exe")
        } else {
            root.join("bin").join("python")
        };
        Ok(Venv { root, python })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    /// `pip install -r <manifest>`.
    pub fn install_file(
        &self,
        runner: &dyn CommandRunner,
        manifest: &Path,
    ) -> AgentResult<ToolOutput> {
        runner.run(
            &[
                self.python.display().to_string(),
                "-m".to_owned(),
                "pip".to_owned(),
                "install".to_owned(),
                "-r".to_owned(),
                manifest.display().to_string(),
            ],
            None,
        )
    }

    /// `pip install <req> <req> …` with every requirement spelled on the
    /// command line, which coaxes far more verbose resolver diagnostics out
    /// of pip than the `-r` form does.
    pub fn install_lines(
        &self,
        runner: &dyn CommandRunner,
        lines: &[String],
    ) -> AgentResult<ToolOutput> {
        let mut argv = vec![
            self.python.display().to_string(),
            "-m".to_owned(),
            "pip".to_owned(),
            "install".to_owned(),
        ];
        argv.extend(lines.iter().cloned());
        runner.run(&argv, None)
    }

    /// `pip freeze`.
    pub fn freeze(&self, runner: &dyn CommandRunner) -> AgentResult<ToolOutput> {
        runner.run(
            &[
                self.python.display().to_string(),
                "-m".to_owned(),
                "pip".to_owned(),
                "freeze".to_owned(),
            ],
            None,
        )
    }
}
