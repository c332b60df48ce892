use crate::fakes::{FakeConnector, FakeShell, FakeStorage, RecordingSink, TokioClock};
use crate::fixtures;
use chrono::{TimeZone, Utc};
use orchard_core::config::Config;
use orchard_core::model::{Guid, Stage, Task};
use orchard_core::workflow::WorkflowConfig;
use orchard_engine::{
    BroadcastChannel, EngineContext, KeyValueCache, MemoryCache, MemoryTaskStore, Orchestrator,
    StageMessage, Submission, TaskStore,
};
use orchard_executor::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const OWNER: &str = "alice";

/// An engine wired to fakes: a slurm agent `hpc`, a local agent `sandbox`,
/// in-memory store and cache, and a clock that follows tokio time.
/// Stages run one at a time through [`EngineHarness::step`].
pub struct EngineHarness {
    pub _temp_dir: tempfile::TempDir,
    pub root: PathBuf,
    pub connector: Arc<FakeConnector>,
    pub storage: Arc<FakeStorage>,
    pub sink: Arc<RecordingSink>,
    pub events: Arc<BroadcastChannel>,
    pub store: Arc<MemoryTaskStore>,
    pub cache: Arc<MemoryCache>,
    pub orchestrator: Orchestrator,
    shutdown: CancellationToken,
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(edit: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("orchard-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut config = Config::default();
        config.service_account = "orchard".to_string();
        config.tasks.refresh_seconds = 60;
        config.tasks.cleanup_minutes = 10;
        config.tasks.initial_delay_seconds = 5;
        config.notifications.enabled = true;
        config
            .agents
            .insert("hpc".to_string(), fixtures::slurm_agent("hpc"));
        config.agents.insert(
            "sandbox".to_string(),
            fixtures::local_agent("sandbox", &root.join("work")),
        );
        edit(&mut config);

        let connector = FakeConnector::new();
        let storage = FakeStorage::new();
        let sink = RecordingSink::new();
        let events = Arc::new(BroadcastChannel::new(1024));
        let store = Arc::new(MemoryTaskStore::new());
        let cache = Arc::new(MemoryCache::new());
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
            .single()
            .expect("valid start time");

        let ctx = EngineContext::builder(config)
            .store(store.clone())
            .cache(cache.clone())
            .connector(connector.clone())
            .storage(storage.clone())
            .notifier(sink.clone())
            .push(events.clone())
            .status_dir(root.join("status"))
            .clock(TokioClock::new(start))
            .retry(RetryPolicy::none())
            .build()
            .expect("Failed to build engine context");

        Self {
            _temp_dir: temp_dir,
            root,
            connector,
            storage,
            sink,
            events,
            store,
            cache,
            orchestrator: Orchestrator::new(ctx),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ctx(&self) -> &EngineContext {
        self.orchestrator.context()
    }

    pub fn shell(&self, agent: &str) -> Arc<FakeShell> {
        self.connector.shell(agent)
    }

    pub fn submit(&self, agent: &str, workflow: &str) -> Task {
        let workflow = WorkflowConfig::from_yaml(workflow).expect("workflow fixture must be valid");
        self.orchestrator
            .submit(OWNER, agent, workflow, Submission::default())
            .expect("Failed to submit task")
    }

    pub fn task(&self, guid: &Guid) -> Task {
        self.store.load(guid).expect("task must exist")
    }

    pub fn cached(&self, key: &str) -> Option<String> {
        self.cache.get(key)
    }

    /// Answers the three submissions of a task with input and output.
    pub fn script_submissions(&self, agent: &str, pull: &str, run: &str, push: &str) {
        let shell = self.shell(agent);
        shell.on("sbatch", &[&format!("Submitted batch job {}", run)]);
        shell.on(".pull.sh'", &[&format!("Submitted batch job {}", pull)]);
        shell.on(".push.sh'", &[&format!("Submitted batch job {}", push)]);
    }

    /// Makes `sacct` report `status` for `job_id` from now on.
    pub fn job_status(&self, agent: &str, job_id: &str, status: &str) {
        self.shell(agent).on(
            &format!("sacct -j '{}'", job_id),
            &[&format!("{}|{}", job_id, status)],
        );
    }

    /// Runs the next due stage, waiting for it in tokio time. `None` when nothing is queued.
    pub async fn step(&self) -> Option<StageMessage> {
        let queue = &self.ctx().queue;
        if queue.pending_len() == 0 {
            return None;
        }
        let message = queue.next(&self.shutdown).await?;
        self.orchestrator
            .pipeline()
            .run(&message.guid, message.stage)
            .await
            .expect("stage outcome must be recorded");
        Some(message)
    }

    /// Steps until `stage` has run, at most `limit` stages.
    pub async fn run_through(&self, stage: Stage, limit: usize) -> Vec<StageMessage> {
        let mut ran = Vec::new();
        for _ in 0..limit {
            match self.step().await {
                Some(message) => {
                    let done = message.stage == stage;
                    ran.push(message);
                    if done {
                        break;
                    }
                }
                None => break,
            }
        }
        ran
    }

    /// Steps until the queue is empty or `limit` stages have run.
    pub async fn drain(&self, limit: usize) -> Vec<StageMessage> {
        let mut ran = Vec::new();
        for _ in 0..limit {
            match self.step().await {
                Some(message) => ran.push(message),
                None => break,
            }
        }
        ran
    }

    pub fn count(ran: &[StageMessage], stage: Stage) -> usize {
        ran.iter().filter(|m| m.stage == stage).count()
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}
