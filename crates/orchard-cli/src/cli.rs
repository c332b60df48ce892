use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "orchard",
    author,
    version,
    about = "Runs containerized workflows as batch jobs on remote clusters.",
    long_about = "Tasks move through preparation, data sharing, job submission, polling, \
                  result checks and cleanup. `orchard serve` drives them; the other \
                  commands read and change the shared task store."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        help = "Path to config.toml (defaults to the XDG config directory)"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the orchestration service until interrupted")]
    Serve(ServeArgs),

    #[command(about = "Submit a workflow as a new task")]
    Submit(SubmitArgs),

    #[command(about = "Cancel a task and its scheduler jobs")]
    Cancel(TaskArgs),

    #[command(about = "List tasks, or show one task in detail")]
    Status(StatusArgs),

    #[command(about = "Show a task's status log")]
    Logs(TaskArgs),

    #[command(about = "Check a workflow file and optionally preview its job script")]
    Validate(ValidateArgs),

    #[command(about = "List configured agents")]
    Agents,
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(
        short = 'w',
        long,
        help = "Number of stage workers (overrides tasks.workers; 0 uses every core)"
    )]
    pub workers: Option<usize>,
}

#[derive(Args)]
pub struct SubmitArgs {
    #[arg(value_name = "WORKFLOW_FILE")]
    pub workflow: PathBuf,

    #[arg(short, long, help = "Agent to run on (must be defined in config.toml)")]
    pub agent: String,

    #[arg(short, long, help = "Task name (defaults to the workflow name)")]
    pub name: Option<String>,

    #[arg(long, env = "USER", help = "Task owner")]
    pub owner: Option<String>,

    #[arg(long, help = "Address for scheduler mail about this task")]
    pub email: Option<String>,
}

#[derive(Args)]
pub struct TaskArgs {
    #[arg(help = "Task guid (or unique prefix)")]
    pub task_id: String,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(help = "Task guid (or unique prefix); lists tasks when omitted")]
    pub task_id: Option<String>,

    #[arg(long, help = "Only list tasks of this owner")]
    pub owner: Option<String>,

    #[arg(long, help = "Print JSON instead of a table")]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    #[arg(value_name = "WORKFLOW_FILE")]
    pub workflow: PathBuf,

    #[arg(short, long, help = "Render the job script this agent would receive")]
    pub agent: Option<String>,
}
