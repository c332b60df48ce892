use orchard_core::model::Agent;
use orchard_core::workflow::{InputKind, WorkflowConfig};

/// `#SBATCH` resource requests for a workflow job, clamped to the agent's ceilings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub cpus_per_task: Option<u32>,
    pub mem: Option<String>,
    pub time: Option<String>,
    pub gpus: u32,
    pub partition: Option<String>,
    pub account: Option<String>,
    pub array: Option<usize>,
    pub nodes: u32,
    pub ntasks: u32,
    pub mail_user: Option<String>,
}

/// Rounds up to whole hours, capped by the agent's `max_walltime` (minutes).
pub fn round_walltime(seconds: u64, max_walltime_minutes: u32) -> String {
    let hours = seconds.div_ceil(3600).max(1);
    let cap = u64::from(max_walltime_minutes / 60).max(1);
    format!("{:02}:00:00", hours.min(cap))
}

impl ResourceRequest {
    pub fn for_workflow(
        agent: &Agent,
        workflow: &WorkflowConfig,
        inputs: usize,
        mail_user: Option<&str>,
    ) -> Self {
        let jobqueue = workflow.jobqueue.clone().unwrap_or_default();
        let walltime = jobqueue
            .walltime_seconds
            .unwrap_or(workflow.time_limit_seconds);

        let fans_out = inputs > 0
            && workflow
                .input
                .as_ref()
                .is_some_and(|i| i.kind == InputKind::Files);
        let count = u32::try_from(inputs).unwrap_or(u32::MAX);

        let (array, nodes, ntasks) = if !fans_out {
            (None, 1, 1)
        } else if agent.job_array {
            (Some(inputs), 1, 1)
        } else if agent.launcher {
            (None, 1, count.min(agent.max_cores).max(1))
        } else {
            (
                None,
                count.min(agent.max_nodes).max(1),
                count.min(agent.max_cores).max(1),
            )
        };

        Self {
            cpus_per_task: Some(jobqueue.cores.unwrap_or(1).min(agent.max_cores).max(1)),
            mem: jobqueue.memory.filter(|_| !agent.uses_virtual_memory()),
            time: Some(round_walltime(walltime, agent.max_walltime)),
            gpus: if workflow.gpu { agent.gpus } else { 0 },
            partition: jobqueue.queue.or_else(|| agent.queue.clone()),
            account: jobqueue.project.or_else(|| agent.project.clone()),
            array,
            nodes,
            ntasks,
            mail_user: mail_user.map(str::to_string),
        }
    }

    /// Minimal request for the pull and push jobs.
    pub fn for_transfer(agent: &Agent) -> Self {
        Self {
            partition: agent.queue.clone(),
            account: agent.project.clone(),
            nodes: 1,
            ntasks: 1,
            ..Default::default()
        }
    }

    pub fn to_directives(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut push = |s: String| lines.push(format!("#SBATCH {}", s));
        if let Some(c) = self.cpus_per_task {
            push(format!("--cpus-per-task={}", c));
        }
        if let Some(m) = &self.mem {
            push(format!("--mem={}", m));
        }
        if let Some(t) = &self.time {
            push(format!("--time={}", t));
        }
        if self.gpus > 0 {
            push(format!("--gres=gpu:{}", self.gpus));
        }
        if let Some(p) = &self.partition {
            push(format!("--partition={}", p));
        }
        if let Some(a) = &self.account {
            push(format!("-A {}", a));
        }
        if let Some(n) = self.array {
            push(format!("--array=1-{}", n));
        }
        push(format!("-N {}", self.nodes.max(1)));
        push(format!("--ntasks={}", self.ntasks.max(1)));
        if let Some(user) = &self.mail_user {
            push("--mail-type=END,FAIL".to_string());
            push(format!("--mail-user={}", user));
        }
        push("--output=%j.out".to_string());
        push("--error=%j.err".to_string());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_core::workflow::JobQueue;

    fn agent() -> Agent {
        toml::from_str(
            r#"
hostname = "login.hpc.example.org"
username = "alice"
workdir = "/scratch/alice"
dialect = "slurm"
max_walltime = 240
max_cores = 8
max_nodes = 4
max_mem = 64
gpus = 2
queue = "normal"
"#,
        )
        .unwrap()
    }

    fn workflow() -> WorkflowConfig {
        WorkflowConfig::from_yaml(
            r#"
image: docker://alpine
commands: echo hi
input:
  kind: files
  path: /iplant/home/alice/images
time:
  limit: 90
  units: Minutes
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_round_walltime() {
        assert_eq!(round_walltime(90 * 60, 240), "02:00:00");
        assert_eq!(round_walltime(1, 240), "01:00:00");
        assert_eq!(round_walltime(10 * 3600, 240), "04:00:00");
        assert_eq!(round_walltime(3600, 30), "01:00:00");
    }

    #[test]
    fn test_fan_out_over_files() {
        let req = ResourceRequest::for_workflow(&agent(), &workflow(), 10, Some("a@b.org"));
        assert_eq!(req.nodes, 4);
        assert_eq!(req.ntasks, 8);
        assert_eq!(req.array, None);
        let lines = req.to_directives();
        assert!(lines.contains(&"#SBATCH --time=02:00:00".to_string()));
        assert!(lines.contains(&"#SBATCH --partition=normal".to_string()));
        assert!(lines.contains(&"#SBATCH --mail-user=a@b.org".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("#SBATCH --error=%j.err"));
    }

    #[test]
    fn test_job_array_agent() {
        let mut agent = agent();
        agent.job_array = true;
        let req = ResourceRequest::for_workflow(&agent, &workflow(), 3, None);
        assert_eq!(req.array, Some(3));
        assert_eq!((req.nodes, req.ntasks), (1, 1));
        assert!(req.to_directives().contains(&"#SBATCH --array=1-3".to_string()));
    }

    #[test]
    fn test_memory_and_gpu_requests() {
        let mut workflow = workflow();
        workflow.gpu = true;
        workflow.jobqueue = Some(JobQueue {
            memory: Some("16GB".into()),
            cores: Some(32),
            ..Default::default()
        });
        let req = ResourceRequest::for_workflow(&agent(), &workflow, 0, None);
        let lines = req.to_directives();
        assert!(lines.contains(&"#SBATCH --mem=16GB".to_string()));
        assert!(lines.contains(&"#SBATCH --gres=gpu:2".to_string()));
        assert!(lines.contains(&"#SBATCH --cpus-per-task=8".to_string()));

        let mut virtual_agent = agent();
        virtual_agent.max_mem = 0;
        let req = ResourceRequest::for_workflow(&virtual_agent, &workflow, 0, None);
        assert_eq!(req.mem, None);
    }
}
