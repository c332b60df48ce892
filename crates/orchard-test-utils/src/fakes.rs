//! In-memory stand-ins for the engine's outside world.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_core::model::Agent;
use orchard_engine::transfer::{StorageClient, StorageFile, StorageStat};
use orchard_engine::{Clock, EngineError, NotificationSink};
use orchard_executor::{CommandOutput, Connector, ExecutorError, RemoteShell};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

enum Reply {
    Output(CommandOutput),
    Unreachable,
    Hang,
}

struct Rule {
    needle: String,
    reply: Reply,
    once: bool,
}

/// Scripted shell. Each command is answered by the most recently added rule
/// whose needle it contains; commands matching no rule succeed silently.
pub struct FakeShell {
    name: String,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl FakeShell {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        })
    }

    fn add(&self, needle: &str, reply: Reply, once: bool) {
        self.rules.lock().unwrap_or_else(|e| e.into_inner()).push(Rule {
            needle: needle.to_string(),
            reply,
            once,
        });
    }

    fn output(stdout: &[&str]) -> CommandOutput {
        CommandOutput {
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            stderr: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn on(&self, needle: &str, stdout: &[&str]) {
        self.add(needle, Reply::Output(Self::output(stdout)), false);
    }

    pub fn once(&self, needle: &str, stdout: &[&str]) {
        self.add(needle, Reply::Output(Self::output(stdout)), true);
    }

    pub fn fail(&self, needle: &str, exit_code: i32, stderr: &str) {
        let output = CommandOutput {
            stdout: Vec::new(),
            stderr: vec![stderr.to_string()],
            exit_code,
        };
        self.add(needle, Reply::Output(output), false);
    }

    pub fn fail_connectivity_once(&self, needle: &str) {
        self.add(needle, Reply::Unreachable, true);
    }

    /// Matching commands never return, like an agent that stops answering mid-call.
    pub fn hang(&self, needle: &str) {
        self.add(needle, Reply::Hang, false);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Contents of the last upload whose path ends with `suffix`.
    pub fn uploaded(&self, suffix: &str) -> Option<String> {
        self.uploads()
            .into_iter()
            .rev()
            .find(|(path, _)| path.ends_with(suffix))
            .map(|(_, contents)| contents)
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    fn target(&self) -> &str {
        &self.name
    }

    async fn run_script(&self, script: &str) -> orchard_executor::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(script.to_string());

        let reply = {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            let Some(index) = rules.iter().rposition(|r| script.contains(&r.needle)) else {
                return Ok(CommandOutput::default());
            };
            if rules[index].once {
                rules.remove(index).reply
            } else {
                match &rules[index].reply {
                    Reply::Output(out) => Reply::Output(out.clone()),
                    Reply::Unreachable => Reply::Unreachable,
                    Reply::Hang => Reply::Hang,
                }
            }
        };
        match reply {
            Reply::Output(out) => Ok(out),
            Reply::Unreachable => Err(ExecutorError::Connectivity {
                target: self.name.clone(),
                message: "Connection timed out".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn upload(&self, path: &str, contents: &str) -> orchard_executor::Result<()> {
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((path.to_string(), contents.to_string()));
        Ok(())
    }
}

/// Hands out one [`FakeShell`] per agent name.
#[derive(Default)]
pub struct FakeConnector {
    shells: Mutex<HashMap<String, Arc<FakeShell>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shell(&self, agent: &str) -> Arc<FakeShell> {
        self.shells
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(agent.to_string())
            .or_insert_with(|| FakeShell::new(agent))
            .clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, agent: &Agent) -> Arc<dyn RemoteShell> {
        self.shell(&agent.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantCall {
    Share(Vec<String>, String),
    Unshare(Vec<String>, String),
}

/// Storage holding directory listings set up by the test.
#[derive(Default)]
pub struct FakeStorage {
    dirs: Mutex<BTreeMap<String, Vec<String>>>,
    grants: Mutex<Vec<GrantCall>>,
    fail_unshare: Mutex<bool>,
}

impl FakeStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_files(&self, dir: &str, names: &[&str]) {
        self.dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(dir.trim_end_matches('/').to_string())
            .or_default()
            .extend(names.iter().map(|n| n.to_string()));
    }

    pub fn fail_unshare(&self) {
        *self.fail_unshare.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn grant_calls(&self) -> Vec<GrantCall> {
        self.grants.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn share(&self, paths: &[String], grantee: &str) -> orchard_engine::Result<()> {
        self.grants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(GrantCall::Share(paths.to_vec(), grantee.to_string()));
        Ok(())
    }

    async fn unshare(&self, paths: &[String], grantee: &str) -> orchard_engine::Result<()> {
        self.grants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(GrantCall::Unshare(paths.to_vec(), grantee.to_string()));
        if *self.fail_unshare.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(EngineError::Storage {
                path: paths.join(","),
                message: "permission denied".to_string(),
            });
        }
        Ok(())
    }

    async fn list_files(&self, path: &str) -> orchard_engine::Result<Vec<StorageFile>> {
        let dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        let path = path.trim_end_matches('/');
        let names = dirs.get(path).ok_or_else(|| EngineError::Storage {
            path: path.to_string(),
            message: "not a collection".to_string(),
        })?;
        Ok(names
            .iter()
            .map(|name| StorageFile {
                name: name.clone(),
                path: format!("{}/{}", path, name),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> orchard_engine::Result<StorageStat> {
        Ok(StorageStat {
            id: path.to_string(),
            modified: Utc::now(),
        })
    }
}

/// Captures published notifications.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(String, String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<(String, String, String)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> std::io::Result<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Wall time that follows tokio's clock, so paused tests see due times pass.
pub struct TokioClock {
    start: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            start,
            origin: tokio::time::Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.start + elapsed
    }
}
