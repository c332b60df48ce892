use super::{Dialect, JobQuery, StatusBucket};
use crate::error::{ClientError, Result};
use orchard_core::constants::suffixes;
use orchard_core::model::SchedulerDialect;
use orchard_executor::shell_quote;

const BUCKETS: &[(StatusBucket, &[&str])] = &[
    (StatusBucket::Failure, &["FAILED"]),
    (StatusBucket::Cancelled, &["CANCELED"]),
    (StatusBucket::Success, &["COMPLETED"]),
];

/// Exit status recorded for a job killed by `cancel_command` (128 + SIGTERM).
const CANCELLED_EXIT: &str = "143";

/// Runs job scripts as detached background processes on the agent itself.
/// The job id is the pid; `<pid>.out`, `<pid>.err` and `<pid>.exit` land in
/// the task directory.
///
/// Each job runs under `setsid`, so its pid is also its process group and
/// cancelling signals the whole group, not only the wrapper shell. The
/// launch is braced so that `&` detaches only the job when the command is
/// chained after `cd`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDialect;

impl Dialect for LocalDialect {
    fn kind(&self) -> SchedulerDialect {
        SchedulerDialect::Local
    }

    fn submit_command(&self, script: &str, depends_on: Option<&str>) -> String {
        let mut body = String::new();
        if let Some(dep) = depends_on {
            body.push_str(&format!(
                "while kill -0 {dep} 2>/dev/null; do sleep 1; done; \
                 if [ \"$(cat {dep}{exit} 2>/dev/null)\" != 0 ]; then echo 1 > \"$$\"{exit}; exit 1; fi; ",
                dep = dep,
                exit = suffixes::EXIT,
            ));
        }
        body.push_str(&format!(
            "sh {script} > \"$$\"{out} 2> \"$$\"{err}; echo $? > \"$$\"{exit}",
            script = shell_quote(script),
            out = suffixes::STDOUT,
            err = suffixes::STDERR,
            exit = suffixes::EXIT,
        ));
        format!(
            "{{ nohup $(command -v setsid) sh -c {} > /dev/null 2>&1 & echo $!; }}",
            shell_quote(&body)
        )
    }

    fn parse_submission(&self, stdout: &[String]) -> Result<String> {
        let line = stdout
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        line.parse::<u32>()
            .map(|pid| pid.to_string())
            .map_err(|_| ClientError::JobIdParse(line.to_string()))
    }

    fn status_command(&self, job_id: &str) -> String {
        format!(
            "if [ -f {id}{exit} ]; then echo \"EXIT $(cat {id}{exit})\"; \
             elif kill -0 {id} 2>/dev/null; then echo RUNNING; fi",
            id = shell_quote(job_id),
            exit = suffixes::EXIT,
        )
    }

    fn parse_status(&self, _job_id: &str, stdout: &[String]) -> JobQuery {
        let Some(line) = stdout.iter().map(|l| l.trim()).find(|l| !l.is_empty()) else {
            return JobQuery::NotFound;
        };
        match line.strip_prefix("EXIT") {
            Some(code) if code.trim() == "0" => JobQuery::Found("COMPLETED".to_string()),
            Some(code) if code.trim() == CANCELLED_EXIT => JobQuery::Found("CANCELED".to_string()),
            Some(_) => JobQuery::Found("FAILED".to_string()),
            None => JobQuery::Found(line.to_string()),
        }
    }

    fn walltime_command(&self, job_id: &str) -> String {
        format!("ps -o etime= -p {} 2>/dev/null || true", shell_quote(job_id))
    }

    fn queue_command(&self, _username: &str, job_id: &str) -> String {
        format!(
            "kill -0 {id} 2>/dev/null && echo {id} || true",
            id = shell_quote(job_id)
        )
    }

    fn cancel_command(&self, job_id: &str) -> String {
        format!(
            "{{ kill -TERM -{id} 2>/dev/null || kill {id}; }} && echo {code} > {id}{exit}",
            id = shell_quote(job_id),
            code = CANCELLED_EXIT,
            exit = suffixes::EXIT
        )
    }

    fn buckets(&self) -> &'static [(StatusBucket, &'static [&'static str])] {
        BUCKETS
    }
}
