//! Thin CLI wrapper over `missioncontrol-core`: `serve` runs the
//! orchestrator process, `commit` runs the validator pipeline and, on
//! success, performs a selective-staging git commit carrying provenance
//! trailers.

mod commit;
mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "MissionControl orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the orchestrator: watcher, tracker, hub, and HTTP API.
    Serve {
        #[arg(long)]
        port: u16,
        #[arg(long = "mission-dir")]
        mission_dir: std::path::PathBuf,
        /// Accepted for CLI compatibility; this build only ever serves the API.
        #[arg(long = "api-only", default_value_t = false)]
        api_only: bool,
        /// Suppress the startup banner.
        #[arg(long, default_value_t = false)]
        headless: bool,
    },
    /// Run the commit-validation pipeline, then (unless --validate-only)
    /// stage the task's scope and commit with provenance trailers.
    Commit {
        #[arg(long)]
        task: String,
        #[arg(long)]
        message: String,
        #[arg(long = "validate-only", default_value_t = false)]
        validate_only: bool,
        #[arg(long, default_value_t = false)]
        strict: bool,
        #[arg(long = "validate-provenance", default_value_t = false)]
        validate_provenance: bool,
        #[arg(long = "validate-scope", default_value_t = false)]
        validate_scope: bool,
        #[arg(long = "diff-base")]
        diff_base: Option<String>,
        #[arg(long = "mission-dir", default_value = ".mission")]
        mission_dir: std::path::PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, mission_dir, api_only, headless } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve::run(port, mission_dir, api_only, headless))
        }
        Command::Commit { task, message, validate_only, strict, validate_provenance, validate_scope, diff_base, mission_dir } => {
            if validate_scope && diff_base.is_none() {
                eprintln!("--validate-scope requires --diff-base <ref>");
                std::process::exit(2);
            }
            let exit_code = commit::run(commit::CommitArgs {
                task,
                message,
                validate_only,
                strict,
                validate_provenance,
                validate_scope,
                diff_base,
                mission_dir,
            })?;
            std::process::exit(exit_code);
        }
    }
}
