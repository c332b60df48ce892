pub mod cache;
pub mod clock;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod lock;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod status_log;
pub mod store;
pub mod transfer;
pub mod watchdog;

pub use cache::{KeyValueCache, MemoryCache};
pub use clock::{Clock, SystemClock};
pub use context::{EngineContext, EngineContextBuilder};
pub use dispatcher::Dispatcher;
pub use error::{EngineError, Result};
pub use health::{HealthMonitor, HealthRecord};
pub use lock::SingleFlightLock;
pub use notify::{
    BroadcastChannel, LogNotificationSink, NotificationSink, PushChannel, TaskEvent,
};
pub use orchestrator::{Orchestrator, Submission};
pub use pipeline::{Pipeline, StageOutcome};
pub use queue::{Admission, StageMessage, StageQueue};
pub use registry::AgentRegistry;
pub use status_log::StatusLog;
pub use store::{JsonTaskStore, MemoryTaskStore, TaskStore};
pub use transfer::{FsStorage, StorageClient, StorageFile, StorageStat, TransferCoordinator};
pub use watchdog::{SweepReport, Watchdog};
