use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use requp::config::AgentConfig;
use requp::oracle::{GeminiOracle, Oracle};
use requp::process::ProcessRunner;
use requp::registry::PypiRegistry;
use requp::{manifest, Agent, AgentResult};

/// Keep a pinned requirements file on the newest versions that still pass
/// your validation.
#[derive(Debug, Parser)]
#[command(name = "requp", version, about)]
pub struct Cli {
    /// Path to the agent configuration
    #[arg(long, value_name = "PATH", default_value = "requp.toml", global = true)]
    config: PathBuf,

    /// Override the configured requirements manifest
    #[arg(long, value_name = "PATH")]
    requirements: Option<PathBuf>,

    /// Override the configured pass cap
    #[arg(long, value_name = "N")]
    max_passes: Option<u32>,

    /// Run without consulting the LLM oracle
    #[arg(long)]
    no_oracle: bool,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge newly discovered dependencies from an ideal-state file into the
    /// manifest
    Reconcile {
        /// Resolved "ideal state" produced by a resolver such as pip-compile
        #[arg(long, value_name = "PATH", default_value = "temp-ideal-state.txt")]
        ideal_state: PathBuf,
    },
}

impl Cli {
    pub fn init_logger(&self) {
        env_logger::Builder::new()
            .filter_level(self.verbose.log_level_filter())
            .format_timestamp(None)
            .init();
    }

    pub fn exec(self) -> AgentResult<()> {
        let mut config = AgentConfig::load(&self.config)?;
        if let Some(path) = self.requirements {
            config.requirements_file = path;
        }
        if let Some(cap) = self.max_passes {
            config.max_run_passes = cap;
        }

        if let Some(Command::Reconcile { ideal_state }) = self.command {
            return manifest::reconcile(&config.requirements_file, &ideal_state);
        }

        let runner = ProcessRunner;
        let registry = PypiRegistry::new(config.index_url.clone())?;
        let oracle = if self.no_oracle {
            None
        } else {
            let client = GeminiOracle::from_env(&config.oracle_model);
            if client.is_none() {
                log::warn!("GEMINI_API_KEY not set; healing will skip oracle suggestions");
            }
            client
        };

        let workdir = std::env::current_dir()?;
        let mut agent = Agent::new(
            &config,
            &runner,
            &registry,
            oracle.as_ref().map(|oracle| oracle as &dyn Oracle),
            workdir,
        )?;
        agent.run()
    }
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
