use crate::constants::{defaults, dirs};
use crate::workflow::WorkflowConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct Guid(pub String);

impl Guid {
    pub fn generate() -> Self {
        Guid(uuid::Uuid::new_v4().to_string())
    }

    pub fn short_id(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Guid(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Created,
    Running,
    Completed,
    Failure,
    Canceled,
    Timeout,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Created,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failure,
        TaskState::Canceled,
        TaskState::Timeout,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failure | TaskState::Canceled | TaskState::Timeout
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => write!(f, "CREATED"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Completed => write!(f, "COMPLETED"),
            TaskState::Failure => write!(f, "FAILURE"),
            TaskState::Canceled => write!(f, "CANCELED"),
            TaskState::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTaskStateError(pub String);

impl fmt::Display for ParseTaskStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid task state: '{}'. Valid values are: CREATED, RUNNING, COMPLETED, FAILURE, CANCELED, TIMEOUT",
            self.0
        )
    }
}

impl std::error::Error for ParseTaskStateError {}

impl FromStr for TaskState {
    type Err = ParseTaskStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(TaskState::Created),
            "RUNNING" => Ok(TaskState::Running),
            "COMPLETED" => Ok(TaskState::Completed),
            "FAILURE" => Ok(TaskState::Failure),
            "CANCELED" => Ok(TaskState::Canceled),
            "TIMEOUT" => Ok(TaskState::Timeout),
            _ => Err(ParseTaskStateError(s.to_string())),
        }
    }
}

/// One step of the orchestration pipeline, in execution order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    PrepareEnvironment,
    ShareData,
    SubmitJobs,
    PollJobs,
    TestResults,
    TestPush,
    UnshareData,
    TidyUp,
}

impl Stage {
    /// Cleanup stages keep running after the task has reached a terminal state.
    pub fn is_cleanup(self) -> bool {
        matches!(self, Stage::UnshareData | Stage::TidyUp)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PrepareEnvironment => write!(f, "prepare-environment"),
            Stage::ShareData => write!(f, "share-data"),
            Stage::SubmitJobs => write!(f, "submit-jobs"),
            Stage::PollJobs => write!(f, "poll-jobs"),
            Stage::TestResults => write!(f, "test-results"),
            Stage::TestPush => write!(f, "test-push"),
            Stage::UnshareData => write!(f, "unshare-data"),
            Stage::TidyUp => write!(f, "tidy-up"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerDialect {
    #[default]
    Local,
    Slurm,
}

impl fmt::Display for SchedulerDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerDialect::Local => write!(f, "local"),
            SchedulerDialect::Slurm => write!(f, "slurm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSchedulerDialectError(pub String);

impl fmt::Display for ParseSchedulerDialectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid scheduler dialect: '{}'. Valid values are: local, slurm",
            self.0
        )
    }
}

impl std::error::Error for ParseSchedulerDialectError {}

impl FromStr for SchedulerDialect {
    type Err = ParseSchedulerDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SchedulerDialect::Local),
            "slurm" => Ok(SchedulerDialect::Slurm),
            _ => Err(ParseSchedulerDialectError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAuth {
    Key(PathBuf),
    Password(String),
}

fn default_port() -> u16 {
    defaults::SSH_PORT
}

fn default_one() -> u32 {
    1
}

fn default_max_walltime() -> u32 {
    60
}

fn default_healthy() -> bool {
    true
}

/// A compute resource that tasks are submitted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: Option<AgentAuth>,
    pub workdir: PathBuf,
    #[serde(default)]
    pub pre_commands: Vec<String>,
    #[serde(default)]
    pub dialect: SchedulerDialect,
    #[serde(default)]
    pub launcher: bool,
    #[serde(default)]
    pub job_array: bool,
    /// Minutes.
    #[serde(default = "default_max_walltime")]
    pub max_walltime: u32,
    #[serde(default = "default_one")]
    pub max_cores: u32,
    #[serde(default = "default_one")]
    pub max_processes: u32,
    #[serde(default = "default_one")]
    pub max_nodes: u32,
    /// Gigabytes; zero means the agent uses virtual memory and takes no `--mem` request.
    #[serde(default)]
    pub max_mem: u32,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

impl Agent {
    pub fn is_local(&self) -> bool {
        self.dialect == SchedulerDialect::Local
    }

    /// Loopback agents without credentials run commands in a local shell instead of over SSH.
    pub fn is_loopback(&self) -> bool {
        self.auth.is_none() && matches!(self.hostname.as_str(), "localhost" | "127.0.0.1")
    }

    pub fn uses_virtual_memory(&self) -> bool {
        self.max_mem == 0
    }

    pub fn address(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }

    pub fn precommand(&self) -> String {
        let lines: Vec<&str> = self
            .pre_commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if lines.is_empty() {
            ":".to_string()
        } else {
            lines.join("; ")
        }
    }

    pub fn task_dir(&self, task: &Task) -> String {
        self.workdir.join(&task.workdir).to_string_lossy().to_string()
    }

    pub fn input_dir(&self, task: &Task) -> String {
        self.workdir
            .join(&task.workdir)
            .join(dirs::INPUT)
            .to_string_lossy()
            .to_string()
    }
}

/// A stage waiting to run, persisted with the task so a restart can pick it up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledStage {
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub guid: Guid,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub owner_email: Option<String>,
    pub agent: String,
    pub workflow: WorkflowConfig,
    pub workdir: String,
    pub state: TaskState,
    #[serde(default)]
    pub job_status: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_ids: Vec<String>,
    #[serde(default)]
    pub job_requested_walltime: Option<String>,
    #[serde(default)]
    pub job_consumed_walltime: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
    pub due_time: DateTime<Utc>,
    #[serde(default)]
    pub inputs_detected: usize,
    #[serde(default)]
    pub results_retrieved: bool,
    #[serde(default)]
    pub results_transferred: usize,
    #[serde(default)]
    pub transferred: bool,
    #[serde(default)]
    pub cleaned_up: bool,
    #[serde(default)]
    pub shared_paths: Vec<String>,
    #[serde(default)]
    pub unshare_scheduled: bool,
    #[serde(default)]
    pub tidy_scheduled: bool,
    #[serde(default)]
    pub next_stages: Vec<ScheduledStage>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Task {
    pub fn new(
        owner: &str,
        agent: &Agent,
        workflow: WorkflowConfig,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let guid = Guid::generate();
        let due_time = now
            .checked_add_signed(workflow.time_limit())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            name: name.unwrap_or_else(|| guid.0.clone()),
            owner: owner.to_string(),
            owner_email: None,
            agent: agent.name.clone(),
            workdir: guid.0.clone(),
            workflow,
            state: TaskState::Created,
            job_status: None,
            job_id: None,
            job_ids: Vec::new(),
            job_requested_walltime: None,
            job_consumed_walltime: None,
            created: now,
            updated: now,
            completed: None,
            due_time,
            inputs_detected: 0,
            results_retrieved: false,
            results_transferred: 0,
            transferred: false,
            cleaned_up: false,
            shared_paths: Vec::new(),
            unshare_scheduled: false,
            tidy_scheduled: false,
            next_stages: Vec::new(),
            message: None,
            guid,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated = now;
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        now > self.due_time
    }
}
