use super::{parse_job_id, Dialect, JobQuery, StatusBucket};
use crate::error::{ClientError, Result};
use orchard_core::model::SchedulerDialect;
use orchard_executor::RemoteCommand;

const BUCKETS: &[(StatusBucket, &[&str])] = &[
    (
        StatusBucket::Failure,
        &[
            "BOOT_FAIL",
            "FAILED",
            "NODE_FAIL",
            "OUT_OF_MEMORY",
            "PREEMPTED",
            "REVOKED",
            "DEADLINE",
        ],
    ),
    (StatusBucket::Cancelled, &["CANCELLED", "CANCELED"]),
    (StatusBucket::Timeout, &["TIMEOUT"]),
    (StatusBucket::Success, &["COMPLETED", "SUCCESS"]),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SlurmDialect;

impl Dialect for SlurmDialect {
    fn kind(&self) -> SchedulerDialect {
        SchedulerDialect::Slurm
    }

    fn submit_command(&self, script: &str, depends_on: Option<&str>) -> String {
        let mut cmd = RemoteCommand::new("sbatch");
        if let Some(dep) = depends_on {
            cmd = cmd.raw(&format!("--dependency=afterok:{}", dep));
        }
        cmd.arg(script).to_shell_string()
    }

    fn parse_submission(&self, stdout: &[String]) -> Result<String> {
        let line = stdout
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .ok_or_else(|| ClientError::JobIdParse(String::new()))?;
        parse_job_id(line)
    }

    fn status_command(&self, job_id: &str) -> String {
        RemoteCommand::new("sacct")
            .raw("-j")
            .arg(job_id)
            .raw("--format=JobID,State")
            .raw("--noheader")
            .raw("--parsable2")
            .to_shell_string()
    }

    /// `sacct --parsable2` prints `JobID|State`; job steps (`1234.batch`) are ignored
    /// and `CANCELLED by 0` or `COMPLETED+` reduce to their first word.
    fn parse_status(&self, job_id: &str, stdout: &[String]) -> JobQuery {
        stdout
            .iter()
            .filter_map(|line| line.trim().split_once('|'))
            .find(|(id, _)| id.trim() == job_id)
            .and_then(|(_, state)| {
                state
                    .replace('+', "")
                    .split_whitespace()
                    .next()
                    .map(str::to_string)
            })
            .map(JobQuery::Found)
            .unwrap_or(JobQuery::NotFound)
    }

    fn walltime_command(&self, job_id: &str) -> String {
        RemoteCommand::new("squeue")
            .raw("-j")
            .arg(job_id)
            .raw("-h")
            .raw("-o")
            .raw("%M")
            .silence_stderr()
            .or(RemoteCommand::new("true"))
            .to_shell_string()
    }

    fn queue_command(&self, username: &str, _job_id: &str) -> String {
        RemoteCommand::new("squeue")
            .raw("-u")
            .arg(username)
            .raw("-h")
            .raw("-o")
            .raw("%i")
            .to_shell_string()
    }

    fn cancel_command(&self, job_id: &str) -> String {
        RemoteCommand::new("scancel").arg(job_id).to_shell_string()
    }

    fn buckets(&self) -> &'static [(StatusBucket, &'static [&'static str])] {
        BUCKETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_submit_command_with_dependency() {
        assert_eq!(
            SlurmDialect.submit_command("t1.sh", None),
            "sbatch 't1.sh'"
        );
        assert_eq!(
            SlurmDialect.submit_command("t1.push.sh", Some("88")),
            "sbatch --dependency=afterok:88 't1.push.sh'"
        );
    }

    #[test]
    fn test_parse_submission_uses_last_line() {
        let out = lines(&["sbatch: note: using default account", "Submitted batch job 99", ""]);
        assert_eq!(SlurmDialect.parse_submission(&out).unwrap(), "99");
        assert!(SlurmDialect.parse_submission(&[]).is_err());
    }

    #[test]
    fn test_parse_status_matches_job_exactly() {
        let out = lines(&[
            "4521|CANCELLED by 5012",
            "4521.batch|CANCELLED",
            "45210|COMPLETED",
        ]);
        assert_eq!(
            SlurmDialect.parse_status("4521", &out),
            JobQuery::Found("CANCELLED".into())
        );
        assert_eq!(
            SlurmDialect.parse_status("45210", &out),
            JobQuery::Found("COMPLETED".into())
        );
        assert_eq!(SlurmDialect.parse_status("452", &out), JobQuery::NotFound);
    }

    #[test]
    fn test_parse_status_strips_plus_suffix() {
        let out = lines(&["77|COMPLETED+"]);
        assert_eq!(
            SlurmDialect.parse_status("77", &out),
            JobQuery::Found("COMPLETED".into())
        );
    }

    #[test]
    fn test_classify_buckets() {
        assert_eq!(SlurmDialect.classify("OUT_OF_MEMORY"), Some(StatusBucket::Failure));
        assert_eq!(SlurmDialect.classify("cancelled"), Some(StatusBucket::Cancelled));
        assert_eq!(SlurmDialect.classify("TIMEOUT"), Some(StatusBucket::Timeout));
        assert_eq!(SlurmDialect.classify("COMPLETED"), Some(StatusBucket::Success));
        assert_eq!(SlurmDialect.classify("COMPLETING"), None);
        assert_eq!(SlurmDialect.classify("PENDING"), None);
        assert_eq!(SlurmDialect.classify("RUNNING"), None);
    }

    #[test]
    fn test_cancel_and_queue_commands() {
        assert_eq!(SlurmDialect.cancel_command("12"), "scancel '12'");
        assert_eq!(
            SlurmDialect.queue_command("alice", "12"),
            "squeue -u 'alice' -h -o %i"
        );
    }
}
