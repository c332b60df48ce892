//! Shared services handed to every stage.

use crate::cache::{KeyValueCache, MemoryCache};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::notify::{BroadcastChannel, LogNotificationSink, NotificationSink, PushChannel, TaskEvent};
use crate::queue::StageQueue;
use crate::registry::AgentRegistry;
use crate::status_log::StatusLog;
use crate::store::{JsonTaskStore, TaskStore};
use crate::transfer::{FsStorage, StorageClient, TransferCoordinator};
use chrono::{DateTime, Utc};
use orchard_client::SchedulerClient;
use orchard_core::config::Config;
use orchard_core::model::{Agent, Task};
use orchard_executor::{Connector, DefaultConnector, RemoteShell, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;

pub struct EngineContext {
    pub config: Config,
    pub store: Arc<dyn TaskStore>,
    pub cache: Arc<dyn KeyValueCache>,
    pub queue: Arc<StageQueue>,
    pub connector: Arc<dyn Connector>,
    pub transfer: TransferCoordinator,
    pub notifier: Arc<dyn NotificationSink>,
    pub push: Arc<dyn PushChannel>,
    pub status_log: StatusLog,
    pub clock: Arc<dyn Clock>,
    pub agents: AgentRegistry,
    pub retry: RetryPolicy,
}

impl EngineContext {
    pub fn builder(config: Config) -> EngineContextBuilder {
        EngineContextBuilder {
            config,
            store: None,
            cache: None,
            connector: None,
            storage: None,
            notifier: None,
            push: None,
            status_dir: None,
            clock: None,
            retry: None,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn shell(&self, agent: &Agent) -> Arc<dyn RemoteShell> {
        self.connector.connect(agent)
    }

    pub fn scheduler(&self, agent: &Agent) -> SchedulerClient {
        SchedulerClient::new(agent, self.shell(agent)).with_retry(self.retry.clone())
    }

    /// Appends `message` to the task's status log and pushes the task to its owner.
    pub fn record(&self, task: &Task, message: &str) {
        if let Err(e) = self.status_log.append(&task.guid, self.now(), message) {
            tracing::warn!("[{}] Could not write status log: {}", task.guid, e);
        }
        self.push.notify(&task.owner, TaskEvent::from(task));
    }

    pub async fn publish(&self, task: &Task, body: &str) {
        let settings = &self.config.notifications;
        if !settings.enabled {
            return;
        }
        let subject = format!("Task {} {}", task.name, task.state);
        if let Err(e) = self.notifier.publish(&settings.topic, &subject, body).await {
            tracing::warn!("[{}] Notification failed: {}", task.guid, e);
        }
    }
}

pub struct EngineContextBuilder {
    config: Config,
    store: Option<Arc<dyn TaskStore>>,
    cache: Option<Arc<dyn KeyValueCache>>,
    connector: Option<Arc<dyn Connector>>,
    storage: Option<Arc<dyn StorageClient>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    push: Option<Arc<dyn PushChannel>>,
    status_dir: Option<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
    retry: Option<RetryPolicy>,
}

impl EngineContextBuilder {
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn KeyValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageClient>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn push(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn status_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.status_dir = Some(dir.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Result<Arc<EngineContext>> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(JsonTaskStore::open(config.store_path()?)?),
        };
        let status_dir = match self.status_dir {
            Some(dir) => dir,
            None => config.status_dir()?,
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(FsStorage::new("/")));
        let transfer = TransferCoordinator::new(
            storage,
            config.service_account.clone(),
            config.public_prefix.clone(),
        );
        let agents = AgentRegistry::new(config.agents.clone());

        Ok(Arc::new(EngineContext {
            store,
            cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new())),
            queue: Arc::new(StageQueue::new()),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(DefaultConnector)),
            transfer,
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(LogNotificationSink)),
            push: self
                .push
                .unwrap_or_else(|| Arc::new(BroadcastChannel::default())),
            status_log: StatusLog::new(status_dir),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            agents,
            retry: self.retry.unwrap_or_else(RetryPolicy::read_only),
            config,
        }))
    }
}
