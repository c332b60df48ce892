pub mod compose;
pub mod error;
pub mod scheduler;

pub use compose::{Artifact, ArtifactRole, JobBundle, JobComposer, ResourceRequest};
pub use error::{ClientError, Result};
pub use scheduler::{
    dialect_for, parse_job_id, resolve, scan_log, Dialect, JobQuery, JobVerdict, LocalDialect,
    SchedulerClient, SlurmDialect, StatusBucket,
};
