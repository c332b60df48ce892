//! Talking to the job scheduler on an agent: submission, status queries,
//! cancellation, and the rules that turn raw scheduler output into a verdict.

mod local;
mod slurm;

pub use local::LocalDialect;
pub use slurm::SlurmDialect;

use crate::error::{ClientError, Result};
use orchard_core::constants::markers;
use orchard_core::model::{Agent, SchedulerDialect};
use orchard_executor::{execute_read_only, ExecOptions, RemoteCommand, RemoteShell, RetryPolicy};
use std::fmt;
use std::sync::Arc;

/// Terminal outcome classes. A status that falls in any bucket means the job is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusBucket {
    Failure,
    Cancelled,
    Timeout,
    Success,
}

impl StatusBucket {
    pub fn canonical_status(self) -> &'static str {
        match self {
            StatusBucket::Failure => "FAILED",
            StatusBucket::Cancelled => "CANCELED",
            StatusBucket::Timeout => "TIMEOUT",
            StatusBucket::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_status())
    }
}

/// What a status query returned. A job the scheduler no longer knows about
/// is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobQuery {
    Found(String),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobVerdict {
    Finished {
        bucket: StatusBucket,
        status: String,
        /// The job vanished after last being seen completing; its real outcome is unknown.
        unknown_final: bool,
    },
    Pending {
        status: Option<String>,
    },
}

/// Scans a scheduler log for terminal markers. Cancellation and timeout
/// markers may be superseded by later lines; failure and success end the scan.
pub fn scan_log<S: AsRef<str>>(lines: &[S]) -> Option<StatusBucket> {
    let has = |line: &str, words: &[&str]| words.iter().any(|w| line.contains(w));
    let mut found = None;
    for line in lines {
        let line = line.as_ref();
        if has(line, markers::CANCELLED) {
            found = Some(StatusBucket::Cancelled);
            continue;
        }
        if has(line, markers::TIMEOUT) {
            found = Some(StatusBucket::Timeout);
            continue;
        }
        if has(line, markers::FAILED) {
            found = Some(StatusBucket::Failure);
            break;
        }
        if has(line, markers::SUCCESS) {
            found = Some(StatusBucket::Success);
            break;
        }
    }
    found
}

/// `Submitted batch job 1234` -> `1234`
pub fn parse_job_id(line: &str) -> Result<String> {
    line.replace("Submitted batch job", "")
        .trim()
        .parse::<u64>()
        .map(|id| id.to_string())
        .map_err(|_| ClientError::JobIdParse(line.to_string()))
}

/// Combines the live status, the log scan and the previously seen status into a verdict.
///
/// A live terminal status wins. Otherwise a terminal marker in the log wins.
/// A job that disappeared right after `COMPLETED`/`COMPLETING` is assumed to
/// have succeeded; anything else is still pending.
pub fn resolve(
    dialect: &dyn Dialect,
    previous: Option<&str>,
    query: &JobQuery,
    log: Option<StatusBucket>,
) -> JobVerdict {
    let live = match query {
        JobQuery::Found(status) => Some(status.as_str()),
        JobQuery::NotFound => None,
    };

    if let Some(status) = live {
        if let Some(bucket) = dialect.classify(status) {
            return JobVerdict::Finished {
                bucket,
                status: status.to_string(),
                unknown_final: false,
            };
        }
    }

    if let Some(bucket) = log {
        return JobVerdict::Finished {
            bucket,
            status: bucket.canonical_status().to_string(),
            unknown_final: false,
        };
    }

    if live.is_none() && matches!(previous, Some("COMPLETED") | Some("COMPLETING")) {
        return JobVerdict::Finished {
            bucket: StatusBucket::Success,
            status: "COMPLETED".to_string(),
            unknown_final: true,
        };
    }

    JobVerdict::Pending {
        status: live.map(str::to_string),
    }
}

/// The command vocabulary of one scheduler flavour.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> SchedulerDialect;

    fn submit_command(&self, script: &str, depends_on: Option<&str>) -> String;

    fn parse_submission(&self, stdout: &[String]) -> Result<String>;

    fn status_command(&self, job_id: &str) -> String;

    fn parse_status(&self, job_id: &str, stdout: &[String]) -> JobQuery;

    fn walltime_command(&self, job_id: &str) -> String;

    /// Prints the ids of live jobs owned by `username`, one per line.
    fn queue_command(&self, username: &str, job_id: &str) -> String;

    fn cancel_command(&self, job_id: &str) -> String;

    fn buckets(&self) -> &'static [(StatusBucket, &'static [&'static str])];

    fn classify(&self, status: &str) -> Option<StatusBucket> {
        let status = status.trim().to_ascii_uppercase();
        self.buckets()
            .iter()
            .find(|(_, names)| names.contains(&status.as_str()))
            .map(|(bucket, _)| *bucket)
    }
}

pub fn dialect_for(kind: SchedulerDialect) -> Box<dyn Dialect> {
    match kind {
        SchedulerDialect::Local => Box::new(LocalDialect),
        SchedulerDialect::Slurm => Box::new(SlurmDialect),
    }
}

/// Scheduler operations for one agent. Queries are retried on connectivity
/// failures; submission and cancellation are not.
pub struct SchedulerClient {
    agent: String,
    username: String,
    precommand: String,
    shell: Arc<dyn RemoteShell>,
    dialect: Box<dyn Dialect>,
    retry: RetryPolicy,
}

impl SchedulerClient {
    pub fn new(agent: &Agent, shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            agent: agent.name.clone(),
            username: agent.username.clone(),
            precommand: agent.precommand(),
            shell,
            dialect: dialect_for(agent.dialect),
            retry: RetryPolicy::read_only(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    fn options(&self, dir: &str) -> ExecOptions {
        ExecOptions::new()
            .in_dir(dir)
            .with_precommand(&self.precommand)
            .allow_stderr()
    }

    pub async fn submit(&self, dir: &str, script: &str, depends_on: Option<&str>) -> Result<String> {
        let command = self.dialect.submit_command(script, depends_on);
        let output = self.shell.execute(&command, &self.options(dir)).await?;
        for line in output.stdout.iter().filter(|l| !l.trim().is_empty()) {
            tracing::info!("[{}] {}", self.agent, line.trim());
        }
        if output.stdout.iter().all(|l| l.trim().is_empty()) {
            return Err(ClientError::EmptySubmission {
                agent: self.agent.clone(),
                command,
            });
        }
        let job_id = self.dialect.parse_submission(&output.stdout)?;
        tracing::info!("[{}] Submitted {} as job {}", self.agent, script, job_id);
        Ok(job_id)
    }

    pub async fn status(&self, dir: &str, job_id: &str) -> Result<JobQuery> {
        let command = self.dialect.status_command(job_id);
        let output =
            execute_read_only(self.shell.as_ref(), &command, &self.options(dir), &self.retry)
                .await?;
        Ok(self.dialect.parse_status(job_id, &output.stdout))
    }

    pub async fn walltime(&self, dir: &str, job_id: &str) -> Result<Option<String>> {
        let command = self.dialect.walltime_command(job_id);
        let output =
            execute_read_only(self.shell.as_ref(), &command, &self.options(dir), &self.retry)
                .await?;
        Ok(output
            .stdout
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    pub async fn scan_log(&self, dir: &str, job_id: &str) -> Result<Option<StatusBucket>> {
        let log = format!("{}{}", job_id, orchard_core::constants::suffixes::STDOUT);
        let command = RemoteCommand::new("cat")
            .arg(&log)
            .silence_stderr()
            .or(RemoteCommand::new("true"))
            .to_shell_string();
        let output =
            execute_read_only(self.shell.as_ref(), &command, &self.options(dir), &self.retry)
                .await?;
        Ok(scan_log(&output.stdout))
    }

    /// Cancels the job if the scheduler still lists it. Returns whether a cancel was issued.
    pub async fn cancel(&self, dir: &str, job_id: &str) -> Result<bool> {
        let queue = self.dialect.queue_command(&self.username, job_id);
        let listed =
            execute_read_only(self.shell.as_ref(), &queue, &self.options(dir), &self.retry)
                .await?;
        if !listed.stdout.iter().any(|l| l.trim() == job_id) {
            tracing::debug!("[{}] Job {} is not queued, nothing to cancel", self.agent, job_id);
            return Ok(false);
        }
        let command = self.dialect.cancel_command(job_id);
        self.shell.execute(&command, &self.options(dir)).await?;
        tracing::info!("[{}] Cancelled job {}", self.agent, job_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("Submitted batch job 4521").unwrap(), "4521");
        assert_eq!(parse_job_id("  Submitted batch job 7  ").unwrap(), "7");
        assert!(parse_job_id("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn test_scan_log_failure_stops_scan() {
        let lines = ["starting", "step NODE_FAIL", "COMPLETED later"];
        assert_eq!(scan_log(&lines), Some(StatusBucket::Failure));
    }

    #[test]
    fn test_scan_log_cancel_can_be_superseded() {
        let lines = ["CANCELLED at 12:00", "all COMPLETED"];
        assert_eq!(scan_log(&lines), Some(StatusBucket::Success));

        let lines = ["job TIMEOUT", "nothing else"];
        assert_eq!(scan_log(&lines), Some(StatusBucket::Timeout));
    }

    #[test]
    fn test_scan_log_without_markers() {
        let lines: [&str; 2] = ["loading image", "processing 3 files"];
        assert_eq!(scan_log(&lines), None);
    }

    #[test]
    fn test_resolve_live_terminal_status_wins() {
        let verdict = resolve(
            &SlurmDialect,
            Some("RUNNING"),
            &JobQuery::Found("CANCELLED".into()),
            Some(StatusBucket::Success),
        );
        assert_eq!(
            verdict,
            JobVerdict::Finished {
                bucket: StatusBucket::Cancelled,
                status: "CANCELLED".into(),
                unknown_final: false
            }
        );
    }

    #[test]
    fn test_resolve_log_overrides_running() {
        let verdict = resolve(
            &SlurmDialect,
            None,
            &JobQuery::Found("RUNNING".into()),
            Some(StatusBucket::Timeout),
        );
        assert!(matches!(
            verdict,
            JobVerdict::Finished {
                bucket: StatusBucket::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_not_found_after_completing() {
        let verdict = resolve(&SlurmDialect, Some("COMPLETING"), &JobQuery::NotFound, None);
        assert_eq!(
            verdict,
            JobVerdict::Finished {
                bucket: StatusBucket::Success,
                status: "COMPLETED".into(),
                unknown_final: true
            }
        );
    }

    #[test]
    fn test_resolve_not_found_without_history_is_pending() {
        let verdict = resolve(&SlurmDialect, None, &JobQuery::NotFound, None);
        assert_eq!(verdict, JobVerdict::Pending { status: None });

        let verdict = resolve(&SlurmDialect, Some("RUNNING"), &JobQuery::NotFound, None);
        assert_eq!(verdict, JobVerdict::Pending { status: None });
    }

    #[test]
    fn test_resolve_running_is_pending() {
        let verdict = resolve(
            &SlurmDialect,
            Some("PENDING"),
            &JobQuery::Found("RUNNING".into()),
            None,
        );
        assert_eq!(
            verdict,
            JobVerdict::Pending {
                status: Some("RUNNING".into())
            }
        );
    }
}
