use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "atoll")]
#[command(version)]
#[command(about = "Declarative infrastructure CLI - plan, diff, and converge resource stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file with resource declarations
    #[arg(short = 'f', long, global = true, default_value = "stack.toml")]
    pub stack: PathBuf,

    /// Override the state directory
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Preview the changes an apply would make
    Plan(PlanArgs),

    /// Converge recorded resources to the declared stack
    Apply(ApplyArgs),

    /// Show recorded resources and their outputs
    Status(StatusArgs),

    /// Delete every resource in the stack
    Destroy(DestroyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan and stop; change nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Number of parallel workers
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop dispatching after the first failure
    #[arg(long, conflicts_with = "continue_on_error")]
    pub fail_fast: bool,

    /// Keep converging independent resources after a failure (default)
    #[arg(long)]
    pub continue_on_error: bool,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Check each record against the provider and report drift
    #[arg(long)]
    pub drift: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel workers
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
