//! CLI command definitions and dispatch for the `courier` binary.
//!
//! Uses clap derive macros for argument parsing. Every command that runs a
//! graph reads it from a JSON file holding `nodes` and `edges`.

pub mod graph_file;
pub mod inspect;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Run dashboard-authored workflow graphs.
#[derive(Parser)]
#[command(name = "courier", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans with the OpenTelemetry stdout exporter.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Keep pause state in memory only (nothing survives the process).
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Data directory holding `config.toml` and `courier.db`.
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow graph.
    Run(RunArgs),

    /// Resume a paused workflow with an answer.
    Resume(ResumeArgs),

    /// Check a graph for structural and configuration errors.
    Validate {
        /// Path to the graph JSON file.
        graph: PathBuf,
    },

    /// List open conversations awaiting an answer.
    #[command(alias = "ls")]
    Conversations,

    /// Show an execution record.
    Execution {
        /// Execution ID.
        id: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the graph JSON file.
    pub graph: PathBuf,

    /// Trigger payload as JSON; merged over the trigger's mock payload.
    #[arg(long)]
    pub trigger: Option<String>,

    /// Workflow ID recorded on conversations and the execution record.
    #[arg(long)]
    pub workflow_id: Option<String>,

    /// Execution ID (a new one is generated when omitted).
    #[arg(long)]
    pub execution_id: Option<String>,

    /// Initial variable as KEY=VALUE; VALUE is parsed as JSON when possible.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

#[derive(Args)]
pub struct ResumeArgs {
    /// Path to the graph JSON file.
    pub graph: PathBuf,

    /// Conversation to resume.
    #[arg(required_unless_present = "phone", conflicts_with = "phone")]
    pub conversation_id: Option<Uuid>,

    /// Resume the most recent open conversation for this phone number.
    #[arg(long)]
    pub phone: Option<String>,

    /// The answer stored under the question's variable key.
    #[arg(long)]
    pub answer: String,

    /// Trigger payload for the resumed run, as JSON.
    #[arg(long)]
    pub trigger: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resume_requires_conversation_or_phone() {
        let missing = Cli::try_parse_from(["courier", "resume", "g.json", "--answer", "yes"]);
        assert!(missing.is_err());

        let by_phone = Cli::try_parse_from([
            "courier", "resume", "g.json", "--phone", "+15550100", "--answer", "yes",
        ])
        .unwrap();
        let Commands::Resume(args) = by_phone.command else {
            panic!("expected resume");
        };
        assert_eq!(args.phone.as_deref(), Some("+15550100"));
        assert!(args.conversation_id.is_none());
    }

    #[test]
    fn test_run_collects_repeated_vars() {
        let cli = Cli::try_parse_from([
            "courier", "--json", "run", "g.json", "--var", "a=1", "--var", "b=x",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.vars, vec!["a=1", "b=x"]);
    }
}
