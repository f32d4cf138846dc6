pub mod common;
pub mod scheduler;
pub mod slurm;
pub mod transport;

pub type Error = crate::common::error::PoolError;
pub type Result<T> = std::result::Result<T, Error>;

/// Identifier of a job accepted by the remote Slurm scheduler.
/// Always a positive integer.
pub type JobId = u64;

pub use scheduler::{
    SchedulerConfig, SchedulerHandle, SchedulerStats, SubmissionRequest, SubmitOpts, Task,
    create_scheduler, load_scheduler,
};
pub use scheduler::mirror::{FileMirror, MirrorSnapshot, MirrorStore};
pub use transport::{CommandChannel, RemoteExecutor, local::LocalExecutor};
